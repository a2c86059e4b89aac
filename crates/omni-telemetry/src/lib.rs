#![forbid(unsafe_code)]

//! Logging initialisation for the OmniCloud binary.
//!
//! # Design
//! - Centralises tracing setup (fmt or JSON) behind a single entry point.
//! - Records the running version once so every module logs the same string.
//! - Honours `RUST_LOG` through `EnvFilter`, defaulting to `info`.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default logging target when `RUST_LOG` is not provided.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static APP_VERSION: OnceCell<String> = OnceCell::new();

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Log level string (e.g., `info`, `debug`).
    pub level: &'a str,
    /// Output format selection for the tracing subscriber.
    pub format: LogFormat,
    /// Version string recorded in structured logs.
    pub version: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable, pretty-printed logs.
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if another subscriber has already been installed
/// globally.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let _ = APP_VERSION.set(config.version.to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?,
    }

    Ok(())
}

/// Access the version string recorded during logging initialisation.
#[must_use]
pub fn app_version() -> &'static str {
    APP_VERSION
        .get()
        .map_or(env!("CARGO_PKG_VERSION"), String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_info_level() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
    }

    #[test]
    fn infer_picks_pretty_in_debug_builds() {
        let format = LogFormat::infer();
        if cfg!(debug_assertions) {
            assert!(matches!(format, LogFormat::Pretty));
        } else {
            assert!(matches!(format, LogFormat::Json));
        }
    }

    #[test]
    fn app_version_falls_back_to_package_version() {
        assert!(!app_version().is_empty());
    }
}
