#![forbid(unsafe_code)]

//! Shared data access layer for the OmniCloud hub: migrations and
//! repositories for every authoritative table.
//!
//! Each repository wraps the shared `PgPool`; state transitions that must
//! survive concurrent writers (transfer lifecycle, generation claims) are
//! guarded inside their SQL rather than in Rust.

pub mod announces;
pub mod commands;
pub mod error;
pub mod inventory;
pub mod packages;
pub mod queue;
pub mod seeders;
pub mod servers;
pub mod stats;
pub mod transfers;
pub mod torrents;
pub mod types;

pub use error::{DataError, DataResult};
pub use types::*;

use sqlx::PgPool;

/// Aggregated handle over every repository.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Initialise the store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail or the database is unreachable.
    pub async fn new(pool: PgPool) -> DataResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::Migrate { source })?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool without running migrations (tests).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Server identity repository.
    #[must_use]
    pub fn servers(&self) -> servers::ServerStore {
        servers::ServerStore::new(self.pool.clone())
    }

    /// Package catalog repository.
    #[must_use]
    pub fn packages(&self) -> packages::PackageStore {
        packages::PackageStore::new(self.pool.clone())
    }

    /// Inventory repository.
    #[must_use]
    pub fn inventory(&self) -> inventory::InventoryStore {
        inventory::InventoryStore::new(self.pool.clone())
    }

    /// Torrent registry repository.
    #[must_use]
    pub fn torrents(&self) -> torrents::TorrentStore {
        torrents::TorrentStore::new(self.pool.clone())
    }

    /// Generation queue and claim repository.
    #[must_use]
    pub fn queue(&self) -> queue::QueueStore {
        queue::QueueStore::new(self.pool.clone())
    }

    /// Seeder repository.
    #[must_use]
    pub fn seeders(&self) -> seeders::SeederStore {
        seeders::SeederStore::new(self.pool.clone())
    }

    /// Transfer repository.
    #[must_use]
    pub fn transfers(&self) -> transfers::TransferStore {
        transfers::TransferStore::new(self.pool.clone())
    }

    /// Per-server torrent statistics repository.
    #[must_use]
    pub fn stats(&self) -> stats::StatsStore {
        stats::StatsStore::new(self.pool.clone())
    }

    /// Announce audit repository.
    #[must_use]
    pub fn announces(&self) -> announces::AnnounceStore {
        announces::AnnounceStore::new(self.pool.clone())
    }

    /// Poll-backed command repository.
    #[must_use]
    pub fn commands(&self) -> commands::CommandStore {
        commands::CommandStore::new(self.pool.clone())
    }

    /// Drop and recreate all data (admin db-reset).
    ///
    /// # Errors
    ///
    /// Returns an error when truncation fails.
    pub async fn reset(&self) -> DataResult<()> {
        sqlx::query(
            "TRUNCATE servers, packages, compositions, assets, server_inventory, \
             torrents, torrent_queue, generation_claims, seeders, transfers, \
             announce_attempts, server_torrent_stats, content_commands, server_actions \
             RESTART IDENTITY CASCADE",
        )
        .execute(&self.pool)
        .await
        .map_err(error::db("store.reset"))?;
        Ok(())
    }
}
