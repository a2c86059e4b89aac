//! Per-server torrent statistics persistence.

use omni_proto::TorrentStatusItem;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataResult, db};
use crate::types::StatsRow;

const UPSERT_STATS: &str = r"
    INSERT INTO server_torrent_stats (server_id, info_hash, status, is_loaded,
                                      is_seeding, is_downloading, progress_percent,
                                      bytes_completed, bytes_total, pieces_completed,
                                      pieces_total, download_speed_bps, upload_speed_bps,
                                      uploaded_bytes, peers_connected, eta_seconds,
                                      error_message, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, now())
    ON CONFLICT (server_id, info_hash)
    DO UPDATE SET status = EXCLUDED.status,
                  is_loaded = EXCLUDED.is_loaded,
                  is_seeding = EXCLUDED.is_seeding,
                  is_downloading = EXCLUDED.is_downloading,
                  progress_percent = EXCLUDED.progress_percent,
                  bytes_completed = EXCLUDED.bytes_completed,
                  bytes_total = EXCLUDED.bytes_total,
                  pieces_completed = EXCLUDED.pieces_completed,
                  pieces_total = EXCLUDED.pieces_total,
                  download_speed_bps = EXCLUDED.download_speed_bps,
                  upload_speed_bps = EXCLUDED.upload_speed_bps,
                  uploaded_bytes = EXCLUDED.uploaded_bytes,
                  peers_connected = EXCLUDED.peers_connected,
                  eta_seconds = EXCLUDED.eta_seconds,
                  error_message = EXCLUDED.error_message,
                  updated_at = now()
";

const SELECT_FOR_SERVER: &str = r"
    SELECT * FROM server_torrent_stats WHERE server_id = $1 ORDER BY info_hash
";

const SELECT_FOR_HASH: &str = r"
    SELECT * FROM server_torrent_stats WHERE info_hash = $1 ORDER BY server_id
";

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Label stored for a reported activity state.
#[must_use]
pub fn activity_label(item: &TorrentStatusItem) -> &'static str {
    match item.status {
        omni_proto::TorrentActivity::Queued => "queued",
        omni_proto::TorrentActivity::Checking => "checking",
        omni_proto::TorrentActivity::Verifying => "verifying",
        omni_proto::TorrentActivity::Downloading => "downloading",
        omni_proto::TorrentActivity::Seeding => "seeding",
        omni_proto::TorrentActivity::Completed => "completed",
        omni_proto::TorrentActivity::Paused => "paused",
        omni_proto::TorrentActivity::Stopped => "stopped",
        omni_proto::TorrentActivity::Error => "error",
    }
}

/// Repository over the `server_torrent_stats` table.
#[derive(Clone)]
pub struct StatsStore {
    pool: PgPool,
}

impl StatsStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the full figure set for one `(server, info_hash)` pair.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn upsert(&self, server_id: Uuid, item: &TorrentStatusItem) -> DataResult<()> {
        sqlx::query(UPSERT_STATS)
            .bind(server_id)
            .bind(&item.info_hash)
            .bind(activity_label(item))
            .bind(item.is_loaded)
            .bind(item.is_seeding)
            .bind(item.is_downloading)
            .bind(item.progress_percent)
            .bind(clamp_i64(item.bytes_completed))
            .bind(clamp_i64(item.bytes_total))
            .bind(clamp_i64(item.pieces_completed))
            .bind(clamp_i64(item.pieces_total))
            .bind(clamp_i64(item.download_speed_bps))
            .bind(clamp_i64(item.upload_speed_bps))
            .bind(clamp_i64(item.uploaded_bytes))
            .bind(i32::try_from(item.peers_connected).unwrap_or(i32::MAX))
            .bind(item.eta_seconds.and_then(|eta| i64::try_from(eta).ok()))
            .bind(item.error_message.as_deref())
            .execute(&self.pool)
            .await
            .map_err(db("stats.upsert"))?;
        Ok(())
    }

    /// Figures reported by one server.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_for_server(&self, server_id: Uuid) -> DataResult<Vec<StatsRow>> {
        sqlx::query_as::<_, StatsRow>(SELECT_FOR_SERVER)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("stats.list_for_server"))
    }

    /// Fleet-wide figures for one torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_for_hash(&self, info_hash: &str) -> DataResult<Vec<StatsRow>> {
        sqlx::query_as::<_, StatsRow>(SELECT_FOR_HASH)
            .bind(info_hash)
            .fetch_all(&self.pool)
            .await
            .map_err(db("stats.list_for_hash"))
    }
}
