//! Bootstrap utilities for microbus binaries.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LOG_ENV_VAR};

/// Initialize tracing from the MICROBUS_LOG filter, defaulting to "info".
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Command-line options shared by every microbus binary.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// Configuration file, layered over `microbus.yaml`
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,
}

impl ConfigArgs {
    /// Load configuration with the `--config` file, if one was given.
    pub fn load(&self) -> Result<Config, ::config::ConfigError> {
        Config::load(self.config.as_deref()).map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })
    }
}

/// Run `connect` until it succeeds, doubling the delay between attempts.
///
/// Services usually start alongside the broker, so the first few attempts
/// may fail while it comes up.
pub async fn connect_with_retry<T, E, F, Fut>(
    target: &str,
    max_attempts: u32,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                info!(target = %target, attempt, "Connected");
                return Ok(client);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    target = %target,
                    attempt,
                    max_attempts,
                    error = %e,
                    retry_in = ?delay,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                error!(target = %target, attempts = attempt, error = %e, "Giving up on connection");
                return Err(e);
            }
        }
    }
}
