//! Poll-backed command persistence: content commands and server actions.
//!
//! These tables are the at-least-once fallback substrate of the command
//! channel: a site that missed its push receives every unacknowledged row
//! on its next poll, and acks clear them.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataError, DataResult, db};
use crate::types::{ContentCommandRow, ServerActionRow};

const INSERT_CONTENT: &str = r"
    INSERT INTO content_commands (command_id, server_id, package_id, action)
    VALUES ($1, $2, $3, $4)
    RETURNING *
";

const SELECT_CONTENT_PENDING: &str = r"
    SELECT * FROM content_commands
    WHERE server_id = $1 AND NOT acknowledged
    ORDER BY created_at, command_id
";

const ACK_CONTENT: &str = r"
    UPDATE content_commands
    SET acknowledged = TRUE, result = $2, message = $3, acknowledged_at = now()
    WHERE command_id = $1 AND NOT acknowledged
    RETURNING *
";

const INSERT_ACTION: &str = r"
    INSERT INTO server_actions (id, server_id, action, payload)
    VALUES ($1, $2, $3, $4)
    RETURNING *
";

const SELECT_ACTION_PENDING: &str = r"
    SELECT * FROM server_actions
    WHERE server_id = $1 AND NOT acknowledged
    ORDER BY created_at, id
    LIMIT 1
";

const ACK_ACTIONS: &str = r"
    UPDATE server_actions
    SET acknowledged = TRUE, success = $3, message = $4, acknowledged_at = now()
    WHERE server_id = $1 AND action = $2 AND NOT acknowledged
";

/// Repository over `content_commands` and `server_actions`.
#[derive(Clone)]
pub struct CommandStore {
    pool: PgPool,
}

impl CommandStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a content command for a site.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn create_content_command(
        &self,
        server_id: Uuid,
        package_id: Uuid,
        action: &str,
    ) -> DataResult<ContentCommandRow> {
        sqlx::query_as::<_, ContentCommandRow>(INSERT_CONTENT)
            .bind(Uuid::new_v4())
            .bind(server_id)
            .bind(package_id)
            .bind(action)
            .fetch_one(&self.pool)
            .await
            .map_err(db("commands.create_content_command"))
    }

    /// Unacknowledged content commands for a site's poll.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn pending_content_commands(
        &self,
        server_id: Uuid,
    ) -> DataResult<Vec<ContentCommandRow>> {
        sqlx::query_as::<_, ContentCommandRow>(SELECT_CONTENT_PENDING)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("commands.pending_content_commands"))
    }

    /// Acknowledge a content command; repeat acks are conflicts so the
    /// caller can treat them as idempotent no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when already acknowledged or
    /// unknown.
    pub async fn ack_content_command(
        &self,
        command_id: Uuid,
        result: &str,
        message: Option<&str>,
    ) -> DataResult<ContentCommandRow> {
        sqlx::query_as::<_, ContentCommandRow>(ACK_CONTENT)
            .bind(command_id)
            .bind(result)
            .bind(message)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("commands.ack_content_command"))?
            .ok_or(DataError::Conflict {
                reason: "content_command_already_acknowledged",
            })
    }

    /// Park a server action (`upgrade`, `restart`, `rescan`).
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn create_action(
        &self,
        server_id: Uuid,
        action: &str,
        payload: Option<serde_json::Value>,
    ) -> DataResult<ServerActionRow> {
        sqlx::query_as::<_, ServerActionRow>(INSERT_ACTION)
            .bind(Uuid::new_v4())
            .bind(server_id)
            .bind(action)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(db("commands.create_action"))
    }

    /// The oldest unacknowledged action for a site's `pending-action` poll.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn pending_action(&self, server_id: Uuid) -> DataResult<Option<ServerActionRow>> {
        sqlx::query_as::<_, ServerActionRow>(SELECT_ACTION_PENDING)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("commands.pending_action"))
    }

    /// Acknowledge every outstanding action of one kind (`action-done`).
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn ack_actions(
        &self,
        server_id: Uuid,
        action: &str,
        success: bool,
        message: Option<&str>,
    ) -> DataResult<u64> {
        let result = sqlx::query(ACK_ACTIONS)
            .bind(server_id)
            .bind(action)
            .bind(success)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(db("commands.ack_actions"))?;
        Ok(result.rows_affected())
    }
}
