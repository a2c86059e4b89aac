//! Error types for torrent building and the engine seam.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for torrent operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Filesystem operation failed.
    #[error("io operation failed")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Bencode payload could not be decoded.
    #[error("invalid bencode payload")]
    Bencode {
        /// Byte offset where decoding failed, when known.
        offset: Option<usize>,
    },
    /// The package directory held no eligible files.
    #[error("package contains no eligible files")]
    EmptyPackage {
        /// Package root that was scanned.
        path: PathBuf,
    },
    /// The build was cancelled; the latest checkpoint was saved.
    #[error("build cancelled")]
    Cancelled,
    /// A `.torrent` blob was structurally invalid.
    #[error("invalid torrent file")]
    InvalidTorrent {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Checkpoint payload could not be read or written.
    #[error("checkpoint operation failed")]
    Checkpoint {
        /// Human-readable detail.
        detail: String,
    },
    /// The info hash string was not 40 hex characters.
    #[error("invalid info hash")]
    InvalidInfoHash {
        /// Offending value.
        value: String,
    },
    /// A piece-hash worker terminated abnormally.
    #[error("piece hash worker failed")]
    HashWorker {
        /// Human-readable detail.
        detail: String,
    },
    /// The engine has no torrent loaded under the given hash.
    #[error("torrent not loaded")]
    NotLoaded {
        /// Hash that failed to resolve.
        info_hash: String,
    },
}

/// Convenience alias for torrent results.
pub type TorrentResult<T> = Result<T, TorrentError>;
