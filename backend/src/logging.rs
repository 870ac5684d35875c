//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter: configured level first, then `RUST_LOG`, then `info`.
pub fn env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    match config.log_level.as_deref() {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Install the global subscriber.
///
/// Logs go to stdout and, when `log_file` is set, also to that file through a
/// non-blocking writer. The returned guard flushes the file on drop and must
/// be kept alive for the lifetime of the program.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;
    let stdout_layer = fmt::layer().with_target(false).compact();

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_wins() {
        let config = LoggingConfig {
            log_file: None,
            log_level: Some("debug".to_string()),
        };
        let filter = env_filter(&config).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_invalid_level_is_error() {
        let config = LoggingConfig {
            log_file: None,
            log_level: Some("vidlink=loud".to_string()),
        };
        assert!(env_filter(&config).is_err());
    }
}
