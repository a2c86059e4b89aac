//! Error types for DCP inspection.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for DCP operations.
#[derive(Debug, Error)]
pub enum DcpError {
    /// Directory did not contain the ASSETMAP/PKL/CPL triplet.
    #[error("directory is not a DCP")]
    NotADcp {
        /// Directory that was inspected.
        path: PathBuf,
    },
    /// A required XML file carried no extractable identifier.
    #[error("missing identifier in metadata file")]
    MissingIdentifier {
        /// File that was scanned.
        path: PathBuf,
        /// Which identifier was expected.
        field: &'static str,
    },
    /// Filesystem operation failed.
    #[error("io operation failed")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
}

/// Convenience alias for DCP results.
pub type DcpResult<T> = Result<T, DcpError>;
