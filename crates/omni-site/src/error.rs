//! Error types for the site runtime.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for site operations.
#[derive(Debug, Error)]
pub enum SiteError {
    /// HTTP client operation failed.
    #[error("http operation failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// URL used for the request.
        url: String,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// The hub answered with a non-success status.
    #[error("hub refused the request")]
    HubStatus {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Stable error key from the hub, when parseable.
        error: Option<String>,
        /// Human message from the hub, when parseable.
        message: Option<String>,
    },
    /// Filesystem operation failed.
    #[error("io operation failed")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Torrent building or engine operation failed.
    #[error("torrent operation failed")]
    Torrent {
        /// Source torrent error.
        #[from]
        source: omni_torrent::TorrentError,
    },
    /// DCP inspection failed.
    #[error("dcp operation failed")]
    Dcp {
        /// Source DCP error.
        #[from]
        source: omni_dcp::DcpError,
    },
    /// Local state payload could not be encoded or decoded.
    #[error("state payload invalid")]
    State {
        /// Human-readable detail.
        detail: String,
    },
    /// The runtime is missing something it needs to proceed.
    #[error("site runtime not ready")]
    NotReady {
        /// Machine-readable reason.
        reason: &'static str,
    },
}

impl SiteError {
    /// Whether the hub refused this call because the server still awaits
    /// admin authorization.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::HubStatus {
                status: 401 | 403,
                ..
            }
        )
    }

    /// Whether the hub reported a lost race (e.g. a generation claim).
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::HubStatus { status: 409, .. })
    }
}

/// Convenience alias for site results.
pub type SiteResult<T> = Result<T, SiteError>;
