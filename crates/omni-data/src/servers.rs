//! Server identity and registration persistence.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataError, DataResult, db};
use crate::types::{ServerRow, UpgradeStatus};

const INSERT_SERVER: &str = r"
    INSERT INTO servers (id, mac, display_name, location, api_url,
                         registration_key_hash, is_authorized, last_seen,
                         storage_capacity, software_version)
    VALUES ($1, $2, $3, $4, $5, $6, FALSE, now(), $7, $8)
    RETURNING *
";

const SELECT_BY_MAC: &str = r"SELECT * FROM servers WHERE mac = $1";

const SELECT_BY_ID: &str = r"SELECT * FROM servers WHERE id = $1";

const SELECT_ALL: &str = r"SELECT * FROM servers ORDER BY display_name, id";

const UPDATE_REGISTRATION: &str = r"
    UPDATE servers
    SET display_name = $2,
        location = $3,
        api_url = $4,
        storage_capacity = COALESCE($5, storage_capacity),
        software_version = COALESCE($6, software_version),
        last_seen = now()
    WHERE id = $1
";

const UPDATE_HEARTBEAT: &str = r"
    UPDATE servers
    SET last_seen = now(),
        storage_capacity = COALESCE($2, storage_capacity),
        software_version = COALESCE($3, software_version),
        package_count = COALESCE($4, package_count)
    WHERE id = $1
";

const UPDATE_DISPLAY: &str = r"
    UPDATE servers
    SET display_name = COALESCE($2, display_name),
        location = COALESCE($3, location),
        api_url = COALESCE($4, api_url)
    WHERE id = $1
";

const UPDATE_AUTHORIZED: &str = r"UPDATE servers SET is_authorized = $2 WHERE id = $1";

const UPDATE_UPGRADE: &str = r"
    UPDATE servers SET upgrade_status = $2, target_version = $3 WHERE id = $1
";

const UPDATE_NAT: &str = r"
    UPDATE servers
    SET is_behind_nat = COALESCE($2, is_behind_nat),
        relay_registered = COALESCE($3, relay_registered),
        nat_last_checked = $4
    WHERE id = $1
";

const DELETE_SERVER: &str = r"DELETE FROM servers WHERE id = $1";

/// Repository over the `servers` table.
#[derive(Clone)]
pub struct ServerStore {
    pool: PgPool,
}

impl ServerStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a server row for a first-time registration.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the MAC is already registered.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        mac: &str,
        display_name: &str,
        location: &str,
        api_url: &str,
        registration_key_hash: &str,
        storage_capacity: Option<i64>,
        software_version: Option<&str>,
    ) -> DataResult<ServerRow> {
        sqlx::query_as::<_, ServerRow>(INSERT_SERVER)
            .bind(Uuid::new_v4())
            .bind(mac)
            .bind(display_name)
            .bind(location)
            .bind(api_url)
            .bind(registration_key_hash)
            .bind(storage_capacity)
            .bind(software_version)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    DataError::Conflict {
                        reason: "mac_already_registered",
                    }
                }
                _ => DataError::Database {
                    operation: "servers.create",
                    source: err,
                },
            })
    }

    /// Look a server up by MAC address.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_mac(&self, mac: &str) -> DataResult<Option<ServerRow>> {
        sqlx::query_as::<_, ServerRow>(SELECT_BY_MAC)
            .bind(mac)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("servers.find_by_mac"))
    }

    /// Look a server up by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_id(&self, id: Uuid) -> DataResult<Option<ServerRow>> {
        sqlx::query_as::<_, ServerRow>(SELECT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("servers.find_by_id"))
    }

    /// All registered servers, ordered for display.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> DataResult<Vec<ServerRow>> {
        sqlx::query_as::<_, ServerRow>(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(db("servers.list"))
    }

    /// Refresh metadata on re-registration of a known MAC.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn refresh_registration(
        &self,
        id: Uuid,
        display_name: &str,
        location: &str,
        api_url: &str,
        storage_capacity: Option<i64>,
        software_version: Option<&str>,
    ) -> DataResult<()> {
        sqlx::query(UPDATE_REGISTRATION)
            .bind(id)
            .bind(display_name)
            .bind(location)
            .bind(api_url)
            .bind(storage_capacity)
            .bind(software_version)
            .execute(&self.pool)
            .await
            .map_err(db("servers.refresh_registration"))?;
        Ok(())
    }

    /// Bump `last_seen` with optional heartbeat figures.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn heartbeat(
        &self,
        id: Uuid,
        storage_capacity: Option<i64>,
        software_version: Option<&str>,
        package_count: Option<i32>,
    ) -> DataResult<()> {
        sqlx::query(UPDATE_HEARTBEAT)
            .bind(id)
            .bind(storage_capacity)
            .bind(software_version)
            .bind(package_count)
            .execute(&self.pool)
            .await
            .map_err(db("servers.heartbeat"))?;
        Ok(())
    }

    /// Admin update of display fields; `None` keeps the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the server does not exist.
    pub async fn update_display(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        location: Option<&str>,
        api_url: Option<&str>,
    ) -> DataResult<()> {
        let result = sqlx::query(UPDATE_DISPLAY)
            .bind(id)
            .bind(display_name)
            .bind(location)
            .bind(api_url)
            .execute(&self.pool)
            .await
            .map_err(db("servers.update_display"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound { entity: "server" });
        }
        Ok(())
    }

    /// Set or clear the admin authorization flag.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the server does not exist.
    pub async fn set_authorized(&self, id: Uuid, authorized: bool) -> DataResult<()> {
        let result = sqlx::query(UPDATE_AUTHORIZED)
            .bind(id)
            .bind(authorized)
            .execute(&self.pool)
            .await
            .map_err(db("servers.set_authorized"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound { entity: "server" });
        }
        Ok(())
    }

    /// Record upgrade bookkeeping state.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn set_upgrade(
        &self,
        id: Uuid,
        status: UpgradeStatus,
        target_version: Option<&str>,
    ) -> DataResult<()> {
        sqlx::query(UPDATE_UPGRADE)
            .bind(id)
            .bind(status.as_str())
            .bind(target_version)
            .execute(&self.pool)
            .await
            .map_err(db("servers.set_upgrade"))?;
        Ok(())
    }

    /// Record NAT/relay self-report figures.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn set_nat_state(
        &self,
        id: Uuid,
        is_behind_nat: Option<bool>,
        relay_registered: Option<bool>,
    ) -> DataResult<()> {
        sqlx::query(UPDATE_NAT)
            .bind(id)
            .bind(is_behind_nat)
            .bind(relay_registered)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db("servers.set_nat_state"))?;
        Ok(())
    }

    /// Delete a server row; inventory, queue, seeders and stats cascade.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when the server does not exist.
    pub async fn delete(&self, id: Uuid) -> DataResult<()> {
        let result = sqlx::query(DELETE_SERVER)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db("servers.delete"))?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound { entity: "server" });
        }
        Ok(())
    }
}
