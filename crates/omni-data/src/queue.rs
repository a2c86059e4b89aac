//! Torrent-generation queue and the fleet-wide claim mutex.

use chrono::{DateTime, Utc};
use omni_proto::QueueStatusItem;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{DataError, DataResult, db};
use crate::types::{QueueRow, QueueStatus};

const CLAIM_INSERT: &str = r"
    INSERT INTO generation_claims (package_id, server_id)
    VALUES ($1, $2)
    ON CONFLICT (package_id) DO NOTHING
";

const CLAIM_DELETE: &str = r"DELETE FROM generation_claims WHERE package_id = $1";

const CLAIM_DELETE_FOR_SERVER: &str = r"
    DELETE FROM generation_claims WHERE package_id = $1 AND server_id = $2
";

const CLAIM_SELECT: &str = r"
    SELECT package_id, server_id, claimed_at FROM generation_claims WHERE package_id = $1
";

const GENERATING_FOR_PACKAGE: &str = r"
    SELECT q.server_id, s.display_name, q.progress_percent
    FROM torrent_queue q
    JOIN servers s ON s.id = q.server_id
    WHERE q.package_id = $1 AND q.status = 'generating'
    ORDER BY q.updated_at DESC
    LIMIT 1
";

const UPSERT_REPORT: &str = r"
    INSERT INTO torrent_queue (id, package_id, server_id, status, progress_percent,
                               current_file, total_size, hashing_speed_bps,
                               error_message, started_at, completed_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
            CASE WHEN $4 = 'generating' THEN now() END,
            CASE WHEN $4 IN ('completed', 'failed', 'cancelled') THEN now() END,
            now())
    ON CONFLICT (package_id, server_id)
    DO UPDATE SET status = EXCLUDED.status,
                  progress_percent = EXCLUDED.progress_percent,
                  current_file = EXCLUDED.current_file,
                  total_size = EXCLUDED.total_size,
                  hashing_speed_bps = EXCLUDED.hashing_speed_bps,
                  error_message = EXCLUDED.error_message,
                  started_at = COALESCE(torrent_queue.started_at, EXCLUDED.started_at),
                  completed_at = CASE
                      WHEN EXCLUDED.status IN ('completed', 'failed', 'cancelled')
                      THEN COALESCE(torrent_queue.completed_at, now())
                  END,
                  updated_at = now()
";

const MARK_COMPLETED: &str = r"
    UPDATE torrent_queue
    SET status = 'completed', progress_percent = 100,
        completed_at = COALESCE(completed_at, now()), updated_at = now()
    WHERE package_id = $1 AND server_id = $2
";

const RETRY_ROW: &str = r"
    UPDATE torrent_queue
    SET status = 'queued', progress_percent = 0, current_file = NULL,
        hashing_speed_bps = NULL, error_message = NULL,
        started_at = NULL, completed_at = NULL, updated_at = now()
    WHERE id = $1 AND status IN ('failed', 'cancelled')
    RETURNING id, package_id, server_id, status, progress_percent, current_file,
              total_size, hashing_speed_bps, position, error_message,
              queued_at, started_at, completed_at, updated_at
";

const CANCEL_ROW: &str = r"
    UPDATE torrent_queue
    SET status = 'cancelled', completed_at = now(), updated_at = now()
    WHERE id = $1 AND status IN ('queued', 'generating')
    RETURNING id, package_id, server_id, status, progress_percent, current_file,
              total_size, hashing_speed_bps, position, error_message,
              queued_at, started_at, completed_at, updated_at
";

const REORDER_ROW: &str = r"
    UPDATE torrent_queue SET position = $2, updated_at = now()
    WHERE id = $1 AND status = 'queued'
";

const CLEAR_COMPLETED: &str = r"DELETE FROM torrent_queue WHERE status = 'completed'";

const DELETE_FOR_SERVER: &str = r"DELETE FROM torrent_queue WHERE server_id = $1";

const SELECT_ROW: &str = r"
    SELECT id, package_id, server_id, status, progress_percent, current_file,
           total_size, hashing_speed_bps, position, error_message,
           queued_at, started_at, completed_at, updated_at
    FROM torrent_queue WHERE id = $1
";

const SELECT_LIST: &str = r"
    SELECT q.id, q.package_id, q.server_id, q.status, q.progress_percent,
           q.current_file, q.total_size, q.hashing_speed_bps, q.position,
           q.error_message, q.queued_at, q.started_at, q.completed_at,
           q.updated_at, p.package_name, s.display_name AS server_name
    FROM torrent_queue q
    JOIN packages p ON p.id = q.package_id
    JOIN servers s ON s.id = q.server_id
    ORDER BY q.position, q.queued_at, q.id
";

const REAP_STALLED: &str = r"
    UPDATE torrent_queue
    SET status = 'failed', error_message = 'stalled',
        completed_at = now(), updated_at = now()
    WHERE status = 'generating'
      AND updated_at < now() - make_interval(secs => $1)
    RETURNING package_id, server_id
";

/// One active claim.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimRow {
    /// Claimed package.
    pub package_id: Uuid,
    /// Claim holder.
    pub server_id: Uuid,
    /// Claim timestamp.
    pub claimed_at: DateTime<Utc>,
}

/// Generation figures for the `wait` answer of a hash check.
#[derive(Debug, Clone, FromRow)]
pub struct GeneratingRow {
    /// Generating server.
    pub server_id: Uuid,
    /// Its display name.
    pub display_name: String,
    /// Latest reported hashing progress.
    pub progress_percent: f64,
}

/// Queue row joined with display names for listings.
#[derive(Debug, Clone, FromRow)]
pub struct QueueListRow {
    /// Row identifier.
    pub id: Uuid,
    /// Package being generated.
    pub package_id: Uuid,
    /// Owning server.
    pub server_id: Uuid,
    /// Queue state label.
    pub status: String,
    /// Hashing progress percentage.
    pub progress_percent: f64,
    /// File currently being hashed.
    pub current_file: Option<String>,
    /// Total payload size.
    pub total_size: i64,
    /// Observed hashing speed.
    pub hashing_speed_bps: Option<i64>,
    /// Reorder position.
    pub position: i32,
    /// Error detail.
    pub error_message: Option<String>,
    /// Enqueue timestamp.
    pub queued_at: DateTime<Utc>,
    /// Generation start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Package display name.
    pub package_name: String,
    /// Server display name.
    pub server_name: String,
}

/// Repository over `torrent_queue` and `generation_claims`.
#[derive(Clone)]
pub struct QueueStore {
    pool: PgPool,
}

impl QueueStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attempt to acquire the fleet-wide generation claim for a package.
    ///
    /// Atomic under races: the claim table's primary key decides, and
    /// exactly one concurrent caller observes a row inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when another server holds the claim.
    pub async fn claim(&self, package_id: Uuid, server_id: Uuid) -> DataResult<()> {
        let result = sqlx::query(CLAIM_INSERT)
            .bind(package_id)
            .bind(server_id)
            .execute(&self.pool)
            .await
            .map_err(db("queue.claim"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::Conflict {
                reason: "claim_held_elsewhere",
            });
        }
        Ok(())
    }

    /// Release the claim regardless of holder.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn release_claim(&self, package_id: Uuid) -> DataResult<()> {
        sqlx::query(CLAIM_DELETE)
            .bind(package_id)
            .execute(&self.pool)
            .await
            .map_err(db("queue.release_claim"))?;
        Ok(())
    }

    /// Release the claim only when held by the given server.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn release_claim_for(&self, package_id: Uuid, server_id: Uuid) -> DataResult<()> {
        sqlx::query(CLAIM_DELETE_FOR_SERVER)
            .bind(package_id)
            .bind(server_id)
            .execute(&self.pool)
            .await
            .map_err(db("queue.release_claim_for"))?;
        Ok(())
    }

    /// Current claim for a package, when one exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn claim_holder(&self, package_id: Uuid) -> DataResult<Option<ClaimRow>> {
        sqlx::query_as::<_, ClaimRow>(CLAIM_SELECT)
            .bind(package_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("queue.claim_holder"))
    }

    /// The server currently generating for a package, with its progress.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn generating_for(&self, package_id: Uuid) -> DataResult<Option<GeneratingRow>> {
        sqlx::query_as::<_, GeneratingRow>(GENERATING_FOR_PACKAGE)
            .bind(package_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("queue.generating_for"))
    }

    /// Upsert a queue row from a site report item.
    ///
    /// Terminal statuses also release the claim when this server holds it.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownStatus`] for unrecognized labels.
    pub async fn upsert_report(
        &self,
        server_id: Uuid,
        package_id: Uuid,
        item: &QueueStatusItem,
    ) -> DataResult<()> {
        let status = QueueStatus::parse(&item.status)?;
        sqlx::query(UPSERT_REPORT)
            .bind(Uuid::new_v4())
            .bind(package_id)
            .bind(server_id)
            .bind(status.as_str())
            .bind(item.progress_percent)
            .bind(item.current_file.as_deref())
            .bind(i64::try_from(item.total_size).unwrap_or(i64::MAX))
            .bind(item.hashing_speed_bps.and_then(|v| i64::try_from(v).ok()))
            .bind(item.error_message.as_deref())
            .execute(&self.pool)
            .await
            .map_err(db("queue.upsert_report"))?;

        if status.releases_claim() {
            self.release_claim_for(package_id, server_id).await?;
        }
        Ok(())
    }

    /// Mark the queue row completed after torrent registration.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn mark_completed(&self, package_id: Uuid, server_id: Uuid) -> DataResult<()> {
        sqlx::query(MARK_COMPLETED)
            .bind(package_id)
            .bind(server_id)
            .execute(&self.pool)
            .await
            .map_err(db("queue.mark_completed"))?;
        self.release_claim_for(package_id, server_id).await
    }

    /// Reset a failed or cancelled row to `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the row is not retryable.
    pub async fn retry(&self, queue_id: Uuid) -> DataResult<QueueRow> {
        sqlx::query_as::<_, QueueRow>(RETRY_ROW)
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("queue.retry"))?
            .ok_or(DataError::Conflict {
                reason: "queue_row_not_retryable",
            })
    }

    /// Cancel a queued or generating row and release its claim.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the row is already terminal.
    pub async fn cancel(&self, queue_id: Uuid) -> DataResult<QueueRow> {
        let row = sqlx::query_as::<_, QueueRow>(CANCEL_ROW)
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("queue.cancel"))?
            .ok_or(DataError::Conflict {
                reason: "queue_row_not_cancellable",
            })?;
        self.release_claim_for(row.package_id, row.server_id).await?;
        Ok(row)
    }

    /// Move a queued row to a new position; refused otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the row is not `queued`.
    pub async fn reorder(&self, queue_id: Uuid, position: i32) -> DataResult<()> {
        let result = sqlx::query(REORDER_ROW)
            .bind(queue_id)
            .bind(position)
            .execute(&self.pool)
            .await
            .map_err(db("queue.reorder"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::Conflict {
                reason: "queue_row_not_queued",
            });
        }
        Ok(())
    }

    /// Remove all completed rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn clear_completed(&self) -> DataResult<u64> {
        let result = sqlx::query(CLEAR_COMPLETED)
            .execute(&self.pool)
            .await
            .map_err(db("queue.clear_completed"))?;
        Ok(result.rows_affected())
    }

    /// Drop every queue row of a server (full-sync report preamble).
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn delete_for_server(&self, server_id: Uuid) -> DataResult<()> {
        sqlx::query(DELETE_FOR_SERVER)
            .bind(server_id)
            .execute(&self.pool)
            .await
            .map_err(db("queue.delete_for_server"))?;
        Ok(())
    }

    /// One queue row.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn get(&self, queue_id: Uuid) -> DataResult<Option<QueueRow>> {
        sqlx::query_as::<_, QueueRow>(SELECT_ROW)
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("queue.get"))
    }

    /// Queue listing joined with display names.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> DataResult<Vec<QueueListRow>> {
        sqlx::query_as::<_, QueueListRow>(SELECT_LIST)
            .fetch_all(&self.pool)
            .await
            .map_err(db("queue.list"))
    }

    /// Flip stalled `generating` rows to `failed` and release their claims.
    ///
    /// Returns the affected `(package_id, server_id)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn reap_stalled(&self, older_than_secs: f64) -> DataResult<Vec<(Uuid, Uuid)>> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(REAP_STALLED)
            .bind(older_than_secs)
            .fetch_all(&self.pool)
            .await
            .map_err(db("queue.reap_stalled"))?;
        for (package_id, server_id) in &rows {
            self.release_claim_for(*package_id, *server_id).await?;
        }
        Ok(rows)
    }
}
