//! tapflow - Entry Point
//!
//! Runs workflows on remote devices through their agent's command channel.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use tapflow::app::options::AppOptions;
use tapflow::app::run::run;
use tapflow::filesys::file::File;
use tapflow::graph::validate;
use tapflow::logs::{init_logging, LogOptions};
use tapflow::models::workflow::Workflow;
use tapflow::storage::layout::StorageLayout;
use tapflow::storage::settings::Settings;
use tapflow::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Validate a workflow file and exit
    if let Some(path) = cli_args.get("validate") {
        std::process::exit(validate_file(path).await);
    }

    // Run the service starting here
    let layout = match cli_args.get("storage") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: Some(layout.logs_dir()),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);
    info!("Running tapflow {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run tapflow: {e}");
        std::process::exit(1);
    }
}

async fn validate_file(path: &str) -> i32 {
    let workflow: Workflow = match File::new(path).read_json().await {
        Ok(workflow) => workflow,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return 2;
        }
    };
    match validate(&workflow) {
        Ok(()) => {
            println!("{}: valid ({} nodes, {} edges)", path, workflow.nodes.len(), workflow.edges.len());
            0
        }
        Err(e) => {
            eprintln!("{}: {}", path, e);
            1
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
