//! Torrent registry persistence.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataError, DataResult, db};
use crate::types::TorrentRow;

const COLUMNS: &str = "id, package_id, info_hash, piece_size, total_pieces, \
                       file_count, total_size_bytes, created_by_server, created_at";

const SELECT_BY_HASH: &str = r"
    SELECT id, package_id, info_hash, piece_size, total_pieces,
           file_count, total_size_bytes, created_by_server, created_at
    FROM torrents WHERE info_hash = $1
";

const SELECT_BY_ID: &str = r"
    SELECT id, package_id, info_hash, piece_size, total_pieces,
           file_count, total_size_bytes, created_by_server, created_at
    FROM torrents WHERE id = $1
";

const SELECT_BY_PACKAGE: &str = r"
    SELECT id, package_id, info_hash, piece_size, total_pieces,
           file_count, total_size_bytes, created_by_server, created_at
    FROM torrents WHERE package_id = $1
";

const SELECT_ALL: &str = r"
    SELECT id, package_id, info_hash, piece_size, total_pieces,
           file_count, total_size_bytes, created_by_server, created_at
    FROM torrents ORDER BY created_at DESC, id
";

const SELECT_FILE: &str = r"SELECT torrent_file FROM torrents WHERE info_hash = $1";

const UPDATE_EXISTING: &str = r"
    UPDATE torrents
    SET piece_size = $2, total_pieces = $3, file_count = $4,
        total_size_bytes = $5, torrent_file = $6
    WHERE info_hash = $1
";

const UPSERT_CANONICAL_FILE: &str = r"
    INSERT INTO canonical_files (package_id, relative_path, bytes)
    VALUES ($1, $2, $3)
    ON CONFLICT (package_id, relative_path)
    DO UPDATE SET bytes = EXCLUDED.bytes
";

const SELECT_CANONICAL_FILES: &str = r"
    SELECT relative_path, bytes FROM canonical_files
    WHERE package_id = $1 ORDER BY relative_path
";

/// Repository over the `torrents` table.
#[derive(Clone)]
pub struct TorrentStore {
    pool: PgPool,
}

impl TorrentStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a torrent, idempotently on `info_hash`.
    ///
    /// Re-registering the same hash refreshes metadata and returns the
    /// existing row with `created = false`. Registering a second, different
    /// hash for a package that already has one is refused.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Conflict`] when the package already carries a
    /// different torrent.
    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        &self,
        package_id: Uuid,
        info_hash: &str,
        piece_size: i64,
        total_pieces: i64,
        file_count: i32,
        total_size_bytes: i64,
        created_by_server: Uuid,
        torrent_file: &[u8],
    ) -> DataResult<(TorrentRow, bool)> {
        if let Some(existing) = self.find_by_info_hash(info_hash).await? {
            sqlx::query(UPDATE_EXISTING)
                .bind(info_hash)
                .bind(piece_size)
                .bind(total_pieces)
                .bind(file_count)
                .bind(total_size_bytes)
                .bind(torrent_file)
                .execute(&self.pool)
                .await
                .map_err(db("torrents.update_existing"))?;
            return Ok((existing, false));
        }

        let insert = format!(
            "INSERT INTO torrents (id, package_id, info_hash, piece_size, total_pieces, \
             file_count, total_size_bytes, created_by_server, torrent_file) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TorrentRow>(&insert)
            .bind(Uuid::new_v4())
            .bind(package_id)
            .bind(info_hash)
            .bind(piece_size)
            .bind(total_pieces)
            .bind(file_count)
            .bind(total_size_bytes)
            .bind(created_by_server)
            .bind(torrent_file)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    DataError::Conflict {
                        reason: "package_already_has_torrent",
                    }
                }
                _ => DataError::Database {
                    operation: "torrents.register",
                    source: err,
                },
            })?;
        Ok((row, true))
    }

    /// Look a torrent up by hex info hash.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_info_hash(&self, info_hash: &str) -> DataResult<Option<TorrentRow>> {
        sqlx::query_as::<_, TorrentRow>(SELECT_BY_HASH)
            .bind(info_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("torrents.find_by_info_hash"))
    }

    /// Look a torrent up by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_id(&self, id: Uuid) -> DataResult<Option<TorrentRow>> {
        sqlx::query_as::<_, TorrentRow>(SELECT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("torrents.find_by_id"))
    }

    /// Look a torrent up by its package.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_package(&self, package_id: Uuid) -> DataResult<Option<TorrentRow>> {
        sqlx::query_as::<_, TorrentRow>(SELECT_BY_PACKAGE)
            .bind(package_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("torrents.find_by_package"))
    }

    /// All registered torrents.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> DataResult<Vec<TorrentRow>> {
        sqlx::query_as::<_, TorrentRow>(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(db("torrents.list"))
    }

    /// Store the canonical non-MXF bytes uploaded with a registration.
    ///
    /// # Errors
    ///
    /// Returns an error when a statement fails.
    pub async fn save_canonical_files(
        &self,
        package_id: Uuid,
        files: &[(String, Vec<u8>)],
    ) -> DataResult<()> {
        for (relative_path, bytes) in files {
            sqlx::query(UPSERT_CANONICAL_FILE)
                .bind(package_id)
                .bind(relative_path)
                .bind(bytes)
                .execute(&self.pool)
                .await
                .map_err(db("torrents.save_canonical_files"))?;
        }
        Ok(())
    }

    /// Canonical non-MXF bytes of a package, by relative path.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn canonical_files(&self, package_id: Uuid) -> DataResult<Vec<(String, Vec<u8>)>> {
        sqlx::query_as(SELECT_CANONICAL_FILES)
            .bind(package_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("torrents.canonical_files"))
    }

    /// Fetch the stored `.torrent` blob.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] when no torrent carries the hash.
    pub async fn fetch_file(&self, info_hash: &str) -> DataResult<Vec<u8>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(SELECT_FILE)
            .bind(info_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("torrents.fetch_file"))?;
        row.map(|(bytes,)| bytes)
            .ok_or(DataError::NotFound { entity: "torrent" })
    }
}
