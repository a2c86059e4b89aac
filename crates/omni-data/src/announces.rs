//! Announce-attempt audit persistence (append-only).

use sqlx::PgPool;

use crate::error::{DataResult, db};
use crate::types::AnnounceAttemptRow;

const INSERT_ATTEMPT: &str = r"
    INSERT INTO announce_attempts (info_hash, peer_id, ip, port, event, status, failure_reason)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
";

const SELECT_RECENT: &str = r"
    SELECT * FROM announce_attempts ORDER BY created_at DESC, id DESC LIMIT $1
";

const SELECT_RECENT_FOR_HASH: &str = r"
    SELECT * FROM announce_attempts WHERE info_hash = $1
    ORDER BY created_at DESC, id DESC LIMIT $2
";

/// Repository over the `announce_attempts` table.
#[derive(Clone)]
pub struct AnnounceStore {
    pool: PgPool,
}

impl AnnounceStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one audit row.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        info_hash: &str,
        peer_id: &str,
        ip: &str,
        port: i32,
        event: Option<&str>,
        ok: bool,
        failure_reason: Option<&str>,
    ) -> DataResult<()> {
        sqlx::query(INSERT_ATTEMPT)
            .bind(info_hash)
            .bind(peer_id)
            .bind(ip)
            .bind(port)
            .bind(event)
            .bind(if ok { "ok" } else { "error" })
            .bind(failure_reason)
            .execute(&self.pool)
            .await
            .map_err(db("announces.record"))?;
        Ok(())
    }

    /// The most recent attempts across all swarms.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn recent(&self, limit: i64) -> DataResult<Vec<AnnounceAttemptRow>> {
        sqlx::query_as::<_, AnnounceAttemptRow>(SELECT_RECENT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db("announces.recent"))
    }

    /// The most recent attempts for one swarm.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn recent_for_hash(
        &self,
        info_hash: &str,
        limit: i64,
    ) -> DataResult<Vec<AnnounceAttemptRow>> {
        sqlx::query_as::<_, AnnounceAttemptRow>(SELECT_RECENT_FOR_HASH)
            .bind(info_hash)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db("announces.recent_for_hash"))
    }
}
