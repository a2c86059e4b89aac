//! Transfer persistence and the status-guarded state machine.
//!
//! Every transition helper guards its `UPDATE` with the allowed prior
//! states from [`TransferStatus::allowed_prior`], so concurrent hub
//! writers serialize on the row without explicit locking: zero rows
//! affected means the transition lost and surfaces as a conflict.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{DataError, DataResult, db};
use crate::types::{TransferRow, TransferStatus};

const COLUMNS: &str = "id, torrent_id, destination_server_id, source_server_id, requested_by, \
     priority, status, progress_percent, downloaded_bytes, total_size_bytes, \
     download_speed_bps, upload_speed_bps, peers_connected, eta_seconds, \
     pending_command, command_acknowledged, delete_data, error_message, \
     started_at, completed_at, created_at, updated_at";

const SELECT_LIST: &str = r"
    SELECT t.id, t.torrent_id, t.destination_server_id, t.source_server_id,
           t.requested_by, t.priority, t.status, t.progress_percent,
           t.downloaded_bytes, t.total_size_bytes, t.download_speed_bps,
           t.upload_speed_bps, t.peers_connected, t.eta_seconds,
           t.pending_command, t.command_acknowledged, t.delete_data,
           t.error_message, t.started_at, t.completed_at, t.created_at,
           t.updated_at,
           tor.info_hash, p.package_name, p.assetmap_uuid,
           dest.display_name AS destination_name,
           src.display_name AS source_name
    FROM transfers t
    JOIN torrents tor ON tor.id = t.torrent_id
    JOIN packages p ON p.id = tor.package_id
    JOIN servers dest ON dest.id = t.destination_server_id
    LEFT JOIN servers src ON src.id = t.source_server_id
    ORDER BY t.created_at DESC, t.id
";

const SELECT_ACTIVE_FOR: &str = r"
    SELECT t.id, t.torrent_id, t.destination_server_id, t.source_server_id,
           t.requested_by, t.priority, t.status, t.progress_percent,
           t.downloaded_bytes, t.total_size_bytes, t.download_speed_bps,
           t.upload_speed_bps, t.peers_connected, t.eta_seconds,
           t.pending_command, t.command_acknowledged, t.delete_data,
           t.error_message, t.started_at, t.completed_at, t.created_at,
           t.updated_at
    FROM transfers t
    JOIN torrents tor ON tor.id = t.torrent_id
    WHERE t.destination_server_id = $1
      AND tor.info_hash = $2
      AND t.status = ANY($3)
    ORDER BY t.created_at DESC
    LIMIT 1
";

const SELECT_PENDING_FOR: &str = r"
    SELECT t.id AS transfer_id, tor.info_hash, p.assetmap_uuid,
           tor.total_size_bytes
    FROM transfers t
    JOIN torrents tor ON tor.id = t.torrent_id
    JOIN packages p ON p.id = tor.package_id
    WHERE t.destination_server_id = $1 AND t.status = 'queued'
    ORDER BY t.priority DESC, t.created_at, t.id
";

const SELECT_COMMANDS_FOR: &str = r"
    SELECT t.id AS transfer_id, tor.info_hash, t.pending_command, t.delete_data
    FROM transfers t
    JOIN torrents tor ON tor.id = t.torrent_id
    WHERE t.destination_server_id = $1
      AND t.pending_command IS NOT NULL
      AND NOT t.command_acknowledged
    ORDER BY t.updated_at, t.id
";

/// Transfer row joined with display fields for listings.
#[derive(Debug, Clone, FromRow)]
pub struct TransferListRow {
    /// Transfer identifier.
    pub id: Uuid,
    /// Torrent being transferred.
    pub torrent_id: Uuid,
    /// Destination server.
    pub destination_server_id: Uuid,
    /// Optional preferred source server.
    pub source_server_id: Option<Uuid>,
    /// Who requested the transfer.
    pub requested_by: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Transfer state label.
    pub status: String,
    /// Completion percentage.
    pub progress_percent: f64,
    /// Bytes downloaded.
    pub downloaded_bytes: i64,
    /// Total bytes expected.
    pub total_size_bytes: i64,
    /// Current download speed.
    pub download_speed_bps: i64,
    /// Current upload speed.
    pub upload_speed_bps: i64,
    /// Connected peers.
    pub peers_connected: i32,
    /// Estimated seconds to completion.
    pub eta_seconds: Option<i64>,
    /// Command awaiting delivery.
    pub pending_command: Option<String>,
    /// Whether the last command was acknowledged.
    pub command_acknowledged: bool,
    /// Whether a cancel should delete on-disk data.
    pub delete_data: bool,
    /// Error detail when failed.
    pub error_message: Option<String>,
    /// First activity timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Hex info hash of the content.
    pub info_hash: String,
    /// Package display name.
    pub package_name: String,
    /// Package ASSETMAP UUID.
    pub assetmap_uuid: Uuid,
    /// Destination display name.
    pub destination_name: String,
    /// Source display name, when pinned.
    pub source_name: Option<String>,
}

/// New-assignment row for the destination's poll.
#[derive(Debug, Clone, FromRow)]
pub struct PendingTransferRow {
    /// Transfer identifier.
    pub transfer_id: Uuid,
    /// Hex info hash to download.
    pub info_hash: String,
    /// Package ASSETMAP UUID.
    pub assetmap_uuid: Uuid,
    /// Total size in bytes.
    pub total_size_bytes: i64,
}

/// Undelivered-command row for the destination's poll.
#[derive(Debug, Clone, FromRow)]
pub struct TransferCommandRow {
    /// Transfer identifier.
    pub transfer_id: Uuid,
    /// Hex info hash of the content.
    pub info_hash: String,
    /// Command label (`pause`, `resume`, `cancel`).
    pub pending_command: Option<String>,
    /// Whether a cancel deletes on-disk data.
    pub delete_data: bool,
}

/// Repository over the `transfers` table.
#[derive(Clone)]
pub struct TransferStore {
    pool: PgPool,
}

impl TransferStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a transfer in `queued`.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn create(
        &self,
        torrent_id: Uuid,
        destination_server_id: Uuid,
        source_server_id: Option<Uuid>,
        requested_by: &str,
        priority: i32,
        total_size_bytes: i64,
    ) -> DataResult<TransferRow> {
        let insert = format!(
            "INSERT INTO transfers (id, torrent_id, destination_server_id, source_server_id, \
             requested_by, priority, total_size_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TransferRow>(&insert)
            .bind(Uuid::new_v4())
            .bind(torrent_id)
            .bind(destination_server_id)
            .bind(source_server_id)
            .bind(requested_by)
            .bind(priority)
            .bind(total_size_bytes)
            .fetch_one(&self.pool)
            .await
            .map_err(db("transfers.create"))
    }

    /// One transfer row.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn get(&self, id: Uuid) -> DataResult<Option<TransferRow>> {
        let select = format!("SELECT {COLUMNS} FROM transfers WHERE id = $1");
        sqlx::query_as::<_, TransferRow>(&select)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("transfers.get"))
    }

    /// All transfers joined with display fields.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> DataResult<Vec<TransferListRow>> {
        sqlx::query_as::<_, TransferListRow>(SELECT_LIST)
            .fetch_all(&self.pool)
            .await
            .map_err(db("transfers.list"))
    }

    /// The destination's most recent active transfer for a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_active_for(
        &self,
        destination_server_id: Uuid,
        info_hash: &str,
    ) -> DataResult<Option<TransferRow>> {
        let active = vec![
            TransferStatus::Queued.as_str().to_string(),
            TransferStatus::Checking.as_str().to_string(),
            TransferStatus::Downloading.as_str().to_string(),
            TransferStatus::Paused.as_str().to_string(),
        ];
        sqlx::query_as::<_, TransferRow>(SELECT_ACTIVE_FOR)
            .bind(destination_server_id)
            .bind(info_hash)
            .bind(active)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("transfers.find_active_for"))
    }

    /// Guarded transition into `status`, optionally setting an error
    /// message. Zero rows affected means the guard refused it.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the transition is not allowed
    /// from the row's current state.
    pub async fn transition(
        &self,
        id: Uuid,
        status: TransferStatus,
        error_message: Option<&str>,
    ) -> DataResult<()> {
        let update = r"
            UPDATE transfers
            SET status = $2,
                error_message = $3,
                download_speed_bps = CASE WHEN $2 IN ('paused', 'error', 'failed',
                                                      'cancelled', 'completed')
                                          THEN 0 ELSE download_speed_bps END,
                upload_speed_bps = CASE WHEN $2 IN ('paused', 'error', 'failed',
                                                    'cancelled', 'completed')
                                        THEN 0 ELSE upload_speed_bps END,
                peers_connected = CASE WHEN $2 IN ('paused', 'error', 'failed',
                                                   'cancelled', 'completed')
                                       THEN 0 ELSE peers_connected END,
                progress_percent = CASE WHEN $2 = 'completed' THEN 100
                                        ELSE progress_percent END,
                started_at = CASE WHEN $2 IN ('checking', 'downloading')
                                  THEN COALESCE(started_at, now())
                                  ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'cancelled')
                                    THEN COALESCE(completed_at, now())
                                    ELSE completed_at END,
                updated_at = now()
            WHERE id = $1 AND status = ANY($4)
        ";
        let result = sqlx::query(update)
            .bind(id)
            .bind(status.as_str())
            .bind(error_message)
            .bind(status.allowed_prior_labels())
            .execute(&self.pool)
            .await
            .map_err(db("transfers.transition"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::Conflict {
                reason: "transition_refused",
            });
        }
        Ok(())
    }

    /// Write live progress figures into an active transfer, promoting it
    /// to `downloading`. Silently ignored when the row is not active.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_progress(
        &self,
        id: Uuid,
        progress_percent: f64,
        downloaded_bytes: i64,
        total_size_bytes: i64,
        download_speed_bps: i64,
        upload_speed_bps: i64,
        peers_connected: i32,
        eta_seconds: Option<i64>,
    ) -> DataResult<()> {
        let update = r"
            UPDATE transfers
            SET status = 'downloading',
                progress_percent = $2,
                downloaded_bytes = $3,
                total_size_bytes = CASE WHEN $4 > 0 THEN $4 ELSE total_size_bytes END,
                download_speed_bps = $5,
                upload_speed_bps = $6,
                peers_connected = $7,
                eta_seconds = $8,
                started_at = COALESCE(started_at, now()),
                updated_at = now()
            WHERE id = $1 AND status IN ('queued', 'checking', 'downloading')
        ";
        sqlx::query(update)
            .bind(id)
            .bind(progress_percent)
            .bind(downloaded_bytes)
            .bind(total_size_bytes)
            .bind(download_speed_bps)
            .bind(upload_speed_bps)
            .bind(peers_connected)
            .bind(eta_seconds)
            .execute(&self.pool)
            .await
            .map_err(db("transfers.apply_progress"))?;
        Ok(())
    }

    /// Record a user command for delivery to the destination.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the command does not apply to
    /// the row's current state.
    pub async fn request_command(
        &self,
        id: Uuid,
        command: &str,
        delete_data: bool,
    ) -> DataResult<()> {
        let allowed: Vec<String> = match command {
            "pause" => vec![
                "queued".to_string(),
                "checking".to_string(),
                "downloading".to_string(),
            ],
            "resume" => vec!["paused".to_string()],
            "cancel" => vec![
                "queued".to_string(),
                "checking".to_string(),
                "downloading".to_string(),
                "paused".to_string(),
                "error".to_string(),
                "failed".to_string(),
            ],
            _ => {
                return Err(DataError::Conflict {
                    reason: "unknown_command",
                });
            }
        };
        let update = r"
            UPDATE transfers
            SET pending_command = $2,
                command_acknowledged = FALSE,
                delete_data = CASE WHEN $2 = 'cancel' THEN $3 ELSE delete_data END,
                updated_at = now()
            WHERE id = $1 AND status = ANY($4)
        ";
        let result = sqlx::query(update)
            .bind(id)
            .bind(command)
            .bind(delete_data)
            .bind(allowed)
            .execute(&self.pool)
            .await
            .map_err(db("transfers.request_command"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::Conflict {
                reason: "command_not_applicable",
            });
        }
        Ok(())
    }

    /// Apply a destination ack: clear the pending command, mark it
    /// acknowledged, and move the status along when the command succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the transfer does not exist.
    pub async fn ack_command(&self, id: Uuid, succeeded: bool) -> DataResult<TransferRow> {
        let row = self
            .get(id)
            .await?
            .ok_or(DataError::NotFound { entity: "transfer" })?;

        if let (Some(command), true) = (row.pending_command.as_deref(), succeeded) {
            let target = match command {
                "pause" => Some(TransferStatus::Paused),
                "resume" => Some(TransferStatus::Downloading),
                "cancel" => Some(TransferStatus::Cancelled),
                _ => None,
            };
            if let Some(target) = target {
                // The report stream may already have moved the row; a
                // refused transition here is expected, not an error.
                match self.transition(id, target, None).await {
                    Ok(()) | Err(DataError::Conflict { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        let clear = format!(
            "UPDATE transfers SET pending_command = NULL, command_acknowledged = TRUE, \
             updated_at = now() WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TransferRow>(&clear)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db("transfers.ack_command"))
    }

    /// Reset a failed/errored/cancelled transfer back to `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the row is not retryable.
    pub async fn retry(&self, id: Uuid) -> DataResult<()> {
        let update = r"
            UPDATE transfers
            SET status = 'queued', progress_percent = 0, downloaded_bytes = 0,
                download_speed_bps = 0, upload_speed_bps = 0, peers_connected = 0,
                eta_seconds = NULL, pending_command = NULL,
                command_acknowledged = FALSE, error_message = NULL,
                started_at = NULL, completed_at = NULL, updated_at = now()
            WHERE id = $1 AND status IN ('error', 'failed', 'cancelled')
        ";
        let result = sqlx::query(update)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db("transfers.retry"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::Conflict {
                reason: "transfer_not_retryable",
            });
        }
        Ok(())
    }

    /// Update scheduling fields of an existing transfer.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the transfer does not exist.
    pub async fn update_scheduling(
        &self,
        id: Uuid,
        priority: Option<i32>,
        source_server_id: Option<Uuid>,
    ) -> DataResult<()> {
        let update = r"
            UPDATE transfers
            SET priority = COALESCE($2, priority),
                source_server_id = COALESCE($3, source_server_id),
                updated_at = now()
            WHERE id = $1
        ";
        let result = sqlx::query(update)
            .bind(id)
            .bind(priority)
            .bind(source_server_id)
            .execute(&self.pool)
            .await
            .map_err(db("transfers.update_scheduling"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound { entity: "transfer" });
        }
        Ok(())
    }

    /// Remove a transfer row entirely.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the transfer does not exist.
    pub async fn delete_row(&self, id: Uuid) -> DataResult<()> {
        let result = sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db("transfers.delete_row"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound { entity: "transfer" });
        }
        Ok(())
    }

    /// New assignments awaiting pickup by the destination.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn pending_for(&self, server_id: Uuid) -> DataResult<Vec<PendingTransferRow>> {
        sqlx::query_as::<_, PendingTransferRow>(SELECT_PENDING_FOR)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("transfers.pending_for"))
    }

    /// Undelivered commands for the destination.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn commands_for(&self, server_id: Uuid) -> DataResult<Vec<TransferCommandRow>> {
        sqlx::query_as::<_, TransferCommandRow>(SELECT_COMMANDS_FOR)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("transfers.commands_for"))
    }
}
