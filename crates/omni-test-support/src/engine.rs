//! A scripted piece engine for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use omni_proto::{TorrentActivity, TorrentStatusItem};
use omni_torrent::{
    EngineLimits, InfoHash, PieceEngine, TorrentError, TorrentResult, engine::PieceVerified,
    summarize,
};
use tokio::sync::{Mutex, broadcast};

/// Engine whose per-torrent status items are scripted by the test.
pub struct ScriptedEngine {
    loaded: Arc<Mutex<HashMap<InfoHash, TorrentStatusItem>>>,
    verified_tx: broadcast::Sender<PieceVerified>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Create an empty scripted engine.
    #[must_use]
    pub fn new() -> Self {
        let (verified_tx, _) = broadcast::channel(64);
        Self {
            loaded: Arc::new(Mutex::new(HashMap::new())),
            verified_tx,
        }
    }

    /// Script the status item reported for a hash.
    pub async fn script(&self, item: TorrentStatusItem) {
        let Ok(hash) = item.info_hash.parse::<InfoHash>() else {
            panic!("scripted item carries a malformed info hash");
        };
        self.loaded.lock().await.insert(hash, item);
    }

    /// Emit a verified-piece notification to subscribers.
    pub fn emit_verified(&self, info_hash: InfoHash, piece_index: u64) {
        let _ = self.verified_tx.send(PieceVerified {
            info_hash,
            piece_index,
        });
    }
}

#[async_trait]
impl PieceEngine for ScriptedEngine {
    async fn load(&self, torrent_bytes: &[u8], _data_dir: &Path) -> TorrentResult<InfoHash> {
        let summary = summarize(torrent_bytes)?;
        let hash = summary.info_hash;
        self.loaded
            .lock()
            .await
            .entry(hash)
            .or_insert_with(|| TorrentStatusItem {
                info_hash: hash.to_hex(),
                status: TorrentActivity::Queued,
                is_loaded: true,
                is_seeding: false,
                is_downloading: false,
                progress_percent: 0.0,
                bytes_completed: 0,
                bytes_total: summary.total_size,
                pieces_completed: 0,
                pieces_total: summary.total_pieces,
                download_speed_bps: 0,
                upload_speed_bps: 0,
                uploaded_bytes: 0,
                peers_connected: 0,
                eta_seconds: None,
                error_message: None,
            });
        Ok(hash)
    }

    async fn start(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let mut loaded = self.loaded.lock().await;
        let item = loaded.get_mut(info_hash).ok_or_else(|| TorrentError::NotLoaded {
            info_hash: info_hash.to_hex(),
        })?;
        if item.progress_percent >= 100.0 {
            item.status = TorrentActivity::Seeding;
            item.is_seeding = true;
        } else {
            item.status = TorrentActivity::Downloading;
            item.is_downloading = true;
        }
        Ok(())
    }

    async fn stop(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let mut loaded = self.loaded.lock().await;
        let item = loaded.get_mut(info_hash).ok_or_else(|| TorrentError::NotLoaded {
            info_hash: info_hash.to_hex(),
        })?;
        item.status = TorrentActivity::Paused;
        item.is_seeding = false;
        item.is_downloading = false;
        item.download_speed_bps = 0;
        item.upload_speed_bps = 0;
        Ok(())
    }

    async fn remove(&self, info_hash: &InfoHash, _with_data: bool) -> TorrentResult<()> {
        self.loaded.lock().await.remove(info_hash);
        Ok(())
    }

    async fn stats(&self) -> Vec<TorrentStatusItem> {
        let mut items: Vec<TorrentStatusItem> =
            self.loaded.lock().await.values().cloned().collect();
        items.sort_by(|a, b| a.info_hash.cmp(&b.info_hash));
        items
    }

    async fn pieces_completed(&self, info_hash: &InfoHash) -> Option<Vec<u8>> {
        let loaded = self.loaded.lock().await;
        let item = loaded.get(info_hash)?;
        let bits = item.pieces_total as usize;
        let mut bitmap = vec![0_u8; bits.div_ceil(8)];
        let complete_pieces = item.pieces_completed as usize;
        for index in 0..complete_pieces.min(bits) {
            bitmap[index / 8] |= 0x80 >> (index % 8);
        }
        Some(bitmap)
    }

    async fn set_limits(&self, _limits: EngineLimits) {}

    fn verified_pieces(&self) -> broadcast::Receiver<PieceVerified> {
        self.verified_tx.subscribe()
    }
}
