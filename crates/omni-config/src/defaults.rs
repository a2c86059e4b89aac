//! Default values applied before the file and environment are consulted.
//!
//! # Design
//! - Centralize port and cadence defaults so hub and site stay consistent.
//! - Hard caps live here next to the defaults they bound.

/// Default HTTP API port.
pub const API_PORT: u16 = 9080;
/// Default tracker announce port on the hub.
pub const TRACKER_PORT: u16 = 9090;
/// Default peer data port used by the piece engine.
pub const TORRENT_DATA_PORT: u16 = 9091;
/// Default command-link port the hub listens on for site push sockets.
pub const LINK_PORT: u16 = 9443;
/// Default relay port.
pub const RELAY_PORT: u16 = 9444;
/// Default library rescan interval in hours.
pub const SCAN_INTERVAL_HOURS: u64 = 6;
/// Default Postgres port.
pub const DATABASE_PORT: u16 = 5432;
/// Default concurrent seed cap per site.
pub const MAX_CONCURRENT_SEEDS: u32 = 50;
/// Default concurrent download cap per site.
pub const MAX_CONCURRENT_DOWNLOADS: u32 = 5;
/// Default concurrent torrent generations per site.
pub const MAX_TORRENT_GENERATION_WORKERS: u32 = 2;
/// Hard cap on concurrent torrent generations per site.
pub const TORRENT_GENERATION_WORKERS_CAP: u32 = 32;
/// Hard cap on piece-hash workers per generation.
pub const PIECE_HASH_WORKERS_CAP: usize = 16;
/// Default relay session cap.
pub const RELAY_MAX_SESSIONS: u32 = 64;
/// Default on-disk location for torrent payloads.
pub const TORRENT_DATA_DIR: &str = "/var/lib/omnicloud/data";
/// Default on-disk location for runtime state (checkpoints, snapshots).
pub const STATE_DIR: &str = "/var/lib/omnicloud/state";
