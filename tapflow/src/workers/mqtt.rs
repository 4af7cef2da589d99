//! MQTT pump worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::mqtt::client::MqttConnection;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Backoff between failed polls
    pub reconnect: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reconnect: CooldownOptions {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }
}

/// Poll the broker connection until shutdown.
///
/// The event loop reconnects on the next poll after an error, so failures
/// only back off before polling again.
pub async fn run<S, F>(
    options: &Options,
    mut connection: MqttConnection,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("MQTT worker starting...");

    let mut failures: u32 = 0;
    loop {
        let polled = tokio::select! {
            _ = &mut shutdown_signal => None,
            polled = connection.poll() => Some(polled),
        };
        let Some(polled) = polled else {
            info!("MQTT worker shutting down...");
            if let Err(e) = connection.disconnect().await {
                debug!("Disconnect on shutdown failed: {}", e);
            }
            return;
        };

        match polled {
            Ok(_) => failures = 0,
            Err(e) => {
                let wait = calc_exp_backoff(&options.reconnect, failures);
                failures = failures.saturating_add(1);
                warn!("MQTT connection error: {}, retrying in {:?}", e, wait);

                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("MQTT worker shutting down...");
                        return;
                    }
                    _ = sleep_fn(wait) => {}
                }
            }
        }
    }
}
