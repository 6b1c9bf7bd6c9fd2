// Logging module - Logging infrastructure
use std::io;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Default filter directive for a configured level
pub fn default_directive(level: &str) -> String {
    format!("nimare={},warn", level)
}

/// Initialize logging system.
///
/// `RUST_LOG` takes precedence over the configured `level`. Diagnostics are
/// written to stderr so stdout carries only command results.
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = default_directive(level);
            EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
                filter: directive.clone(),
                message: e.to_string(),
            })?
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    tracing::debug!("nimare logging system initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("debug"), "nimare=debug,warn");
    }

    #[test]
    fn test_second_init_reports_an_error() {
        let _ = init_logging("info");
        // Only one global subscriber can be installed per process
        assert!(matches!(init_logging("info"), Err(LoggingError::Install(_))));
    }
}
