//! Tracing subscriber setup for the `tvctl` binary. The library itself only
//! emits `tracing` events and never installs a subscriber.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::ControlError;

/// Environment variable holding an `EnvFilter` directive, e.g. `lan_tv_control=debug`
pub const LOG_ENV: &str = "TV_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines on stderr
    Compact,
    /// One JSON object per event on stderr
    Json,
}

fn env_filter(default_level: &str) -> Result<EnvFilter, ControlError> {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive)
            .map_err(|e| ControlError::Config(format!("{}={}: {}", LOG_ENV, directive, e))),
        Err(_) => Ok(EnvFilter::new(default_level)),
    }
}

pub fn init_logging(format: LogFormat, verbose: bool) -> Result<(), ControlError> {
    let filter = env_filter(if verbose { "debug" } else { "info" })?;

    let result = match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
    };

    result.map_err(|e| ControlError::Config(format!("failed to initialize logging: {}", e)))
}
