//! Per-site inventory persistence.

use omni_proto::InventoryStatus;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataResult, db};
use crate::types::InventoryRow;

const UPSERT_ROW: &str = r"
    INSERT INTO server_inventory (server_id, package_id, local_path, status, last_verified)
    VALUES ($1, $2, $3, $4, now())
    ON CONFLICT (server_id, package_id)
    DO UPDATE SET local_path = EXCLUDED.local_path,
                  status = EXCLUDED.status,
                  last_verified = now()
";

const DELETE_ROW: &str =
    r"DELETE FROM server_inventory WHERE server_id = $1 AND package_id = $2";

const SELECT_FOR_SERVER: &str = r"
    SELECT * FROM server_inventory WHERE server_id = $1 ORDER BY package_id
";

const SELECT_HOLDERS: &str = r"
    SELECT * FROM server_inventory WHERE package_id = $1 AND status = 'online'
";

const SELECT_ROW: &str = r"
    SELECT * FROM server_inventory WHERE server_id = $1 AND package_id = $2
";

const MARK_MISSING_OFFLINE: &str = r"
    UPDATE server_inventory
    SET status = 'offline'
    WHERE server_id = $1 AND NOT (package_id = ANY($2))
";

/// Label stored for an [`InventoryStatus`].
#[must_use]
pub const fn status_label(status: InventoryStatus) -> &'static str {
    match status {
        InventoryStatus::Online => "online",
        InventoryStatus::Offline => "offline",
        InventoryStatus::Incomplete => "incomplete",
    }
}

/// Repository over the `server_inventory` table.
#[derive(Clone)]
pub struct InventoryStore {
    pool: PgPool,
}

impl InventoryStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert one inventory row.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn upsert(
        &self,
        server_id: Uuid,
        package_id: Uuid,
        local_path: &str,
        status: InventoryStatus,
    ) -> DataResult<()> {
        sqlx::query(UPSERT_ROW)
            .bind(server_id)
            .bind(package_id)
            .bind(local_path)
            .bind(status_label(status))
            .execute(&self.pool)
            .await
            .map_err(db("inventory.upsert"))?;
        Ok(())
    }

    /// Mark every package of the server that is absent from `present` as
    /// offline (packages that vanished between scans).
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn mark_missing_offline(
        &self,
        server_id: Uuid,
        present: &[Uuid],
    ) -> DataResult<u64> {
        let result = sqlx::query(MARK_MISSING_OFFLINE)
            .bind(server_id)
            .bind(present)
            .execute(&self.pool)
            .await
            .map_err(db("inventory.mark_missing_offline"))?;
        Ok(result.rows_affected())
    }

    /// Remove one inventory row (content deleted from the site).
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn delete(&self, server_id: Uuid, package_id: Uuid) -> DataResult<()> {
        sqlx::query(DELETE_ROW)
            .bind(server_id)
            .bind(package_id)
            .execute(&self.pool)
            .await
            .map_err(db("inventory.delete"))?;
        Ok(())
    }

    /// Inventory of one server.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_for_server(&self, server_id: Uuid) -> DataResult<Vec<InventoryRow>> {
        sqlx::query_as::<_, InventoryRow>(SELECT_FOR_SERVER)
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("inventory.list_for_server"))
    }

    /// Servers holding a package online.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn holders(&self, package_id: Uuid) -> DataResult<Vec<InventoryRow>> {
        sqlx::query_as::<_, InventoryRow>(SELECT_HOLDERS)
            .bind(package_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("inventory.holders"))
    }

    /// One inventory row, when present.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn get(&self, server_id: Uuid, package_id: Uuid) -> DataResult<Option<InventoryRow>> {
        sqlx::query_as::<_, InventoryRow>(SELECT_ROW)
            .bind(server_id)
            .bind(package_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("inventory.get"))
    }
}
