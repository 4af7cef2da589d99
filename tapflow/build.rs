//! Build script for tapflow
//!
//! Stamps the binary with the source revision and build time reported by
//! `--version` and `GET /version`.

use chrono::Utc;
use std::process::Command;

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    let git_hash = std::env::var("TAPFLOW_GIT_HASH")
        .ok()
        .or_else(|| git_output(&["describe", "--always", "--dirty"]))
        .unwrap_or_else(|| "unknown".to_string());

    let build_time = Utc::now().to_rfc3339();

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);
    println!("cargo:rerun-if-env-changed=TAPFLOW_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
