//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file")]
    Io {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A line in the configuration file was not `key=value` shaped.
    #[error("malformed configuration line")]
    MalformedLine {
        /// Path to the offending file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Server mode value was invalid.
    #[error("invalid server mode")]
    InvalidServerMode {
        /// Mode payload provided by the caller.
        value: String,
    },
    /// A field required for the selected mode was missing.
    #[error("missing required configuration field")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
