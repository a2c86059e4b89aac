//! The piece-engine capability seam.
//!
//! The engine that actually moves pieces between peers is pluggable:
//! production wires a real BitTorrent runtime in, tests use a scripted
//! stub, and [`InertEngine`] provides local bookkeeping (load, verify
//! presence, report) for deployments where transport runs out-of-process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use omni_proto::{TorrentActivity, TorrentStatusItem};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use crate::error::{TorrentError, TorrentResult};
use crate::info_hash::InfoHash;
use crate::torrent_file::{TorrentSummary, summarize};

/// Rate caps applied engine-wide; `0` means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineLimits {
    /// Upload cap in bytes per second.
    pub max_upload_rate: u64,
    /// Download cap in bytes per second.
    pub max_download_rate: u64,
    /// Concurrent seeds.
    pub max_concurrent_seeds: u32,
    /// Concurrent downloads.
    pub max_concurrent_downloads: u32,
}

/// Notification emitted when a piece passes verification.
#[derive(Debug, Clone)]
pub struct PieceVerified {
    /// Torrent the piece belongs to.
    pub info_hash: InfoHash,
    /// Zero-based piece index.
    pub piece_index: u64,
}

/// Capability implemented by piece-transfer engines.
#[async_trait]
pub trait PieceEngine: Send + Sync {
    /// Load a torrent into the engine, rooting its payload at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob is malformed or the engine refuses it.
    async fn load(&self, torrent_bytes: &[u8], data_dir: &Path) -> TorrentResult<InfoHash>;

    /// Start (or resume) transfer activity for a loaded torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when no torrent is loaded under the hash.
    async fn start(&self, info_hash: &InfoHash) -> TorrentResult<()>;

    /// Stop transfer activity, keeping the torrent loaded.
    ///
    /// # Errors
    ///
    /// Returns an error when no torrent is loaded under the hash.
    async fn stop(&self, info_hash: &InfoHash) -> TorrentResult<()>;

    /// Unload a torrent, optionally deleting its on-disk payload.
    ///
    /// # Errors
    ///
    /// Returns an error when removal fails; removing an unknown hash is a
    /// no-op.
    async fn remove(&self, info_hash: &InfoHash, with_data: bool) -> TorrentResult<()>;

    /// Status figures for every loaded torrent.
    async fn stats(&self) -> Vec<TorrentStatusItem>;

    /// Verified-piece bitmap for a loaded torrent (one bit per piece,
    /// most-significant bit first), or `None` when unknown.
    async fn pieces_completed(&self, info_hash: &InfoHash) -> Option<Vec<u8>>;

    /// Apply engine-wide rate and concurrency caps.
    async fn set_limits(&self, limits: EngineLimits);

    /// Subscribe to verified-piece notifications.
    fn verified_pieces(&self) -> broadcast::Receiver<PieceVerified>;
}

struct LoadedTorrent {
    summary: TorrentSummary,
    data_dir: PathBuf,
    started: bool,
}

/// Bookkeeping-only engine: verifies on-disk presence and reports, but
/// moves no pieces itself.
pub struct InertEngine {
    torrents: Arc<RwLock<HashMap<InfoHash, LoadedTorrent>>>,
    verified_tx: broadcast::Sender<PieceVerified>,
}

impl Default for InertEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InertEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        let (verified_tx, _) = broadcast::channel(256);
        Self {
            torrents: Arc::new(RwLock::new(HashMap::new())),
            verified_tx,
        }
    }

    /// Bytes present on disk for the payload, counting only files whose
    /// size matches the metainfo exactly.
    fn bytes_present(summary: &TorrentSummary, payload_root: &Path) -> u64 {
        let mut present = 0_u64;
        for entry in &summary.files {
            let mut full = payload_root.to_path_buf();
            for component in entry.path.split('/') {
                full.push(component);
            }
            match std::fs::metadata(&full) {
                Ok(metadata) if metadata.len() == entry.length => present += entry.length,
                _ => {}
            }
        }
        present
    }
}

#[async_trait]
impl PieceEngine for InertEngine {
    async fn load(&self, torrent_bytes: &[u8], data_dir: &Path) -> TorrentResult<InfoHash> {
        let summary = summarize(torrent_bytes)?;
        let info_hash = summary.info_hash;
        let mut torrents = self.torrents.write().await;
        torrents.insert(
            info_hash,
            LoadedTorrent {
                summary,
                data_dir: data_dir.to_path_buf(),
                started: false,
            },
        );
        info!(info_hash = %info_hash, "torrent loaded");
        Ok(info_hash)
    }

    async fn start(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let mut torrents = self.torrents.write().await;
        let torrent = torrents
            .get_mut(info_hash)
            .ok_or_else(|| TorrentError::NotLoaded {
                info_hash: info_hash.to_hex(),
            })?;
        torrent.started = true;
        Ok(())
    }

    async fn stop(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let mut torrents = self.torrents.write().await;
        let torrent = torrents
            .get_mut(info_hash)
            .ok_or_else(|| TorrentError::NotLoaded {
                info_hash: info_hash.to_hex(),
            })?;
        torrent.started = false;
        Ok(())
    }

    async fn remove(&self, info_hash: &InfoHash, with_data: bool) -> TorrentResult<()> {
        let mut torrents = self.torrents.write().await;
        let Some(torrent) = torrents.remove(info_hash) else {
            debug!(info_hash = %info_hash, "remove for unknown torrent ignored");
            return Ok(());
        };
        if with_data {
            let payload_root = torrent.data_dir.join(&torrent.summary.name);
            match std::fs::remove_dir_all(&payload_root) {
                Ok(()) => info!(path = %payload_root.display(), "payload removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(TorrentError::Io {
                        path: payload_root,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Vec<TorrentStatusItem> {
        let torrents = self.torrents.read().await;
        let mut items = Vec::with_capacity(torrents.len());
        for (info_hash, torrent) in torrents.iter() {
            let payload_root = torrent.data_dir.join(&torrent.summary.name);
            let bytes_completed = Self::bytes_present(&torrent.summary, &payload_root);
            let complete = bytes_completed >= torrent.summary.total_size;
            let status = if complete && torrent.started {
                TorrentActivity::Seeding
            } else if complete {
                TorrentActivity::Completed
            } else {
                TorrentActivity::Stopped
            };
            let progress = if torrent.summary.total_size == 0 {
                100.0
            } else {
                (bytes_completed as f64 / torrent.summary.total_size as f64) * 100.0
            };
            let pieces_completed = if complete {
                torrent.summary.total_pieces
            } else {
                (bytes_completed / torrent.summary.piece_size.max(1))
                    .min(torrent.summary.total_pieces)
            };
            items.push(TorrentStatusItem {
                info_hash: info_hash.to_hex(),
                status,
                is_loaded: true,
                is_seeding: complete && torrent.started,
                is_downloading: false,
                progress_percent: progress,
                bytes_completed,
                bytes_total: torrent.summary.total_size,
                pieces_completed,
                pieces_total: torrent.summary.total_pieces,
                download_speed_bps: 0,
                upload_speed_bps: 0,
                uploaded_bytes: 0,
                peers_connected: 0,
                eta_seconds: None,
                error_message: None,
            });
        }
        items.sort_by(|a, b| a.info_hash.cmp(&b.info_hash));
        items
    }

    async fn pieces_completed(&self, info_hash: &InfoHash) -> Option<Vec<u8>> {
        let torrents = self.torrents.read().await;
        let torrent = torrents.get(info_hash)?;
        let payload_root = torrent.data_dir.join(&torrent.summary.name);
        let complete =
            Self::bytes_present(&torrent.summary, &payload_root) >= torrent.summary.total_size;
        let bits = torrent.summary.total_pieces as usize;
        let mut bitmap = vec![0_u8; bits.div_ceil(8)];
        if complete {
            for (index, byte) in bitmap.iter_mut().enumerate() {
                let remaining = bits - index * 8;
                *byte = if remaining >= 8 {
                    0xFF
                } else {
                    // Set the top `remaining` bits of the final byte.
                    0xFF << (8 - remaining)
                };
            }
        }
        Some(bitmap)
    }

    async fn set_limits(&self, limits: EngineLimits) {
        debug!(
            up = limits.max_upload_rate,
            down = limits.max_download_rate,
            "rate limits recorded (inert engine moves no pieces)"
        );
    }

    fn verified_pieces(&self) -> broadcast::Receiver<PieceVerified> {
        self.verified_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::Bencode;
    use crate::torrent_file::assemble;
    use std::collections::BTreeMap;
    use std::fs;

    fn demo_torrent(name: &str, file_name: &str, size: i64) -> Vec<u8> {
        let mut file = BTreeMap::new();
        file.insert(b"length".to_vec(), Bencode::Int(size));
        file.insert(
            b"path".to_vec(),
            Bencode::List(vec![Bencode::str(file_name)]),
        );
        let mut info = BTreeMap::new();
        info.insert(b"files".to_vec(), Bencode::List(vec![Bencode::Dict(file)]));
        info.insert(b"name".to_vec(), Bencode::str(name));
        info.insert(b"piece length".to_vec(), Bencode::Int(1024));
        info.insert(b"pieces".to_vec(), Bencode::Bytes(vec![0_u8; 40]));
        assemble(Bencode::Dict(info))
    }

    #[tokio::test]
    async fn load_and_report_complete_payload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let payload = tmp.path().join("Demo_FTR");
        fs::create_dir_all(&payload).expect("dir");
        fs::write(payload.join("picture.mxf"), vec![0_u8; 2048]).expect("payload");

        let engine = InertEngine::new();
        let blob = demo_torrent("Demo_FTR", "picture.mxf", 2048);
        let hash = engine.load(&blob, tmp.path()).await.expect("load");
        engine.start(&hash).await.expect("start");

        let stats = engine.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].status, TorrentActivity::Seeding);
        assert!((stats[0].progress_percent - 100.0).abs() < f64::EPSILON);

        let bitmap = engine.pieces_completed(&hash).await.expect("bitmap");
        assert_eq!(bitmap, vec![0b1100_0000]);
    }

    #[tokio::test]
    async fn missing_payload_reports_stopped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let engine = InertEngine::new();
        let blob = demo_torrent("Demo_FTR", "picture.mxf", 2048);
        engine.load(&blob, tmp.path()).await.expect("load");

        let stats = engine.stats().await;
        assert_eq!(stats[0].status, TorrentActivity::Stopped);
        assert_eq!(stats[0].bytes_completed, 0);
    }

    #[tokio::test]
    async fn remove_with_data_deletes_payload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let payload = tmp.path().join("Demo_FTR");
        fs::create_dir_all(&payload).expect("dir");
        fs::write(payload.join("picture.mxf"), vec![0_u8; 2048]).expect("payload");

        let engine = InertEngine::new();
        let blob = demo_torrent("Demo_FTR", "picture.mxf", 2048);
        let hash = engine.load(&blob, tmp.path()).await.expect("load");
        engine.remove(&hash, true).await.expect("remove");

        assert!(!payload.exists());
        assert!(engine.stats().await.is_empty());
        // Unknown hash removal stays a no-op.
        engine.remove(&hash, true).await.expect("idempotent remove");
    }
}
