#![forbid(unsafe_code)]

//! Canonical package identity and the piece-engine capability seam.
//!
//! The builder turns an on-disk DCP into a deterministic BitTorrent
//! info-hash and `.torrent` blob: junk files filtered, remaining files
//! sorted by byte-lexicographic relative path, pieces SHA-1 hashed over the
//! concatenation of the sorted files. Any two sites holding byte-identical
//! content compute the same identity.

pub mod bencode;
pub mod builder;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod info_hash;
pub mod torrent_file;

pub use builder::{
    BuildOptions, BuildProgress, BuiltTorrent, PackageFile, build_package_torrent,
    enumerate_files, select_piece_size,
};
pub use checkpoint::{BuildCheckpoint, CheckpointStore, FileCheckpointStore};
pub use engine::{EngineLimits, InertEngine, PieceEngine};
pub use error::{TorrentError, TorrentResult};
pub use info_hash::InfoHash;
pub use torrent_file::{ANNOUNCE_PLACEHOLDER, TorrentSummary, rewrite_announce, summarize};
