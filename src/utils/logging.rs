//! Structured logging setup.
//!
//! Installs a global `tracing_subscriber::fmt` subscriber. `RUST_LOG`, when
//! set, overrides the configured level.

use std::sync::OnceLock;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber described by `config`.
///
/// Only the first successful call installs anything; later calls return `Ok`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    let _ = INITIALIZED.set(());
    info!(
        app = %config.app_name,
        level = %config.log_level,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config).unwrap();
        init_logging(&LoggingConfig {
            json_format: true,
            ..config
        })
        .unwrap();
    }
}
