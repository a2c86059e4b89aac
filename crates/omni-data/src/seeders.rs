//! Seeder persistence.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataResult, db};
use crate::types::{SeederRow, SeederStatus};

const UPSERT_SEEDER: &str = r"
    INSERT INTO seeders (torrent_id, server_id, status, uploaded_bytes, last_announce)
    VALUES ($1, $2, $3, $4, now())
    ON CONFLICT (torrent_id, server_id)
    DO UPDATE SET status = EXCLUDED.status,
                  uploaded_bytes = GREATEST(seeders.uploaded_bytes, EXCLUDED.uploaded_bytes),
                  last_announce = now()
";

const DELETE_SEEDER: &str = r"DELETE FROM seeders WHERE torrent_id = $1 AND server_id = $2";

const SELECT_FOR_TORRENT: &str = r"
    SELECT * FROM seeders WHERE torrent_id = $1 ORDER BY server_id
";

const COUNT_FOR_TORRENT: &str = r"
    SELECT COUNT(*) FROM seeders WHERE torrent_id = $1 AND status IN ('seeding', 'completed')
";

/// Repository over the `seeders` table.
#[derive(Clone)]
pub struct SeederStore {
    pool: PgPool,
}

impl SeederStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a seeder row; `uploaded_bytes` is monotonic.
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn upsert(
        &self,
        torrent_id: Uuid,
        server_id: Uuid,
        status: SeederStatus,
        uploaded_bytes: i64,
    ) -> DataResult<()> {
        sqlx::query(UPSERT_SEEDER)
            .bind(torrent_id)
            .bind(server_id)
            .bind(status.as_str())
            .bind(uploaded_bytes)
            .execute(&self.pool)
            .await
            .map_err(db("seeders.upsert"))?;
        Ok(())
    }

    /// Drop a seeder row (content deleted from the site).
    ///
    /// # Errors
    ///
    /// Returns an error when the statement fails.
    pub async fn delete(&self, torrent_id: Uuid, server_id: Uuid) -> DataResult<()> {
        sqlx::query(DELETE_SEEDER)
            .bind(torrent_id)
            .bind(server_id)
            .execute(&self.pool)
            .await
            .map_err(db("seeders.delete"))?;
        Ok(())
    }

    /// All seeders of a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_for_torrent(&self, torrent_id: Uuid) -> DataResult<Vec<SeederRow>> {
        sqlx::query_as::<_, SeederRow>(SELECT_FOR_TORRENT)
            .bind(torrent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("seeders.list_for_torrent"))
    }

    /// Count of servers holding the full content.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn holder_count(&self, torrent_id: Uuid) -> DataResult<i64> {
        let (count,): (i64,) = sqlx::query_as(COUNT_FOR_TORRENT)
            .bind(torrent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db("seeders.holder_count"))?;
        Ok(count)
    }
}
