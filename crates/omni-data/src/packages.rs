//! Package catalog persistence.

use omni_proto::PackageDescriptor;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DataResult, db};
use crate::types::{AssetRow, CompositionRow, PackageRow};

const UPSERT_PACKAGE: &str = r"
    INSERT INTO packages (id, assetmap_uuid, package_name, content_title,
                          content_kind, total_size_bytes, file_count, last_verified)
    VALUES ($1, $2, $3, $4, $5, $6, $7, now())
    ON CONFLICT (assetmap_uuid)
    DO UPDATE SET last_verified = now()
    RETURNING *
";

const SELECT_BY_ASSETMAP: &str = r"SELECT * FROM packages WHERE assetmap_uuid = $1";

const SELECT_BY_ID: &str = r"SELECT * FROM packages WHERE id = $1";

const SELECT_ALL: &str = r"SELECT * FROM packages ORDER BY package_name, id";

const SELECT_BY_CPL: &str = r"
    SELECT p.* FROM packages p
    JOIN compositions c ON c.package_id = p.id
    WHERE c.cpl_uuid = $1
";

const INSERT_COMPOSITION: &str = r"
    INSERT INTO compositions (id, package_id, cpl_uuid, edit_rate, resolution,
                              sound_config, reel_count, duration_frames)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (package_id, cpl_uuid) DO NOTHING
";

const INSERT_ASSET: &str = r"
    INSERT INTO assets (id, package_id, asset_uuid, file_path, file_name,
                        asset_type, size_bytes, hash_algorithm, hash_value)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (package_id, asset_uuid) DO NOTHING
";

const SELECT_COMPOSITIONS: &str =
    r"SELECT * FROM compositions WHERE package_id = $1 ORDER BY cpl_uuid";

const SELECT_ASSETS: &str = r"SELECT * FROM assets WHERE package_id = $1 ORDER BY file_name";

/// Repository over `packages`, `compositions` and `assets`.
#[derive(Clone)]
pub struct PackageStore {
    pool: PgPool,
}

impl PackageStore {
    pub(crate) const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a package on first discovery anywhere in the fleet.
    ///
    /// Packages are content-addressed and never mutate: a repeat upsert
    /// only bumps `last_verified`. Compositions and assets are inserted
    /// when unseen and left untouched otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when any statement fails; the upsert runs in one
    /// transaction.
    pub async fn upsert(&self, descriptor: &PackageDescriptor) -> DataResult<PackageRow> {
        let mut tx = self.pool.begin().await.map_err(db("packages.begin"))?;

        let package = sqlx::query_as::<_, PackageRow>(UPSERT_PACKAGE)
            .bind(Uuid::new_v4())
            .bind(descriptor.assetmap_uuid)
            .bind(&descriptor.package_name)
            .bind(&descriptor.content_title)
            .bind(&descriptor.content_kind)
            .bind(i64::try_from(descriptor.total_size_bytes).unwrap_or(i64::MAX))
            .bind(i32::try_from(descriptor.file_count).unwrap_or(i32::MAX))
            .fetch_one(&mut *tx)
            .await
            .map_err(db("packages.upsert"))?;

        for composition in &descriptor.compositions {
            sqlx::query(INSERT_COMPOSITION)
                .bind(Uuid::new_v4())
                .bind(package.id)
                .bind(composition.cpl_uuid)
                .bind(&composition.edit_rate)
                .bind(&composition.resolution)
                .bind(&composition.sound_config)
                .bind(i32::try_from(composition.reel_count).unwrap_or(i32::MAX))
                .bind(i64::try_from(composition.duration_frames).unwrap_or(i64::MAX))
                .execute(&mut *tx)
                .await
                .map_err(db("packages.insert_composition"))?;
        }

        for asset in &descriptor.assets {
            sqlx::query(INSERT_ASSET)
                .bind(Uuid::new_v4())
                .bind(package.id)
                .bind(asset.asset_uuid)
                .bind(&asset.file_path)
                .bind(&asset.file_name)
                .bind(&asset.asset_type)
                .bind(i64::try_from(asset.size_bytes).unwrap_or(i64::MAX))
                .bind(asset.hash_algorithm.as_deref())
                .bind(asset.hash_value.as_deref())
                .execute(&mut *tx)
                .await
                .map_err(db("packages.insert_asset"))?;
        }

        tx.commit().await.map_err(db("packages.commit"))?;
        Ok(package)
    }

    /// Look a package up by ASSETMAP UUID.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_assetmap(&self, assetmap_uuid: Uuid) -> DataResult<Option<PackageRow>> {
        sqlx::query_as::<_, PackageRow>(SELECT_BY_ASSETMAP)
            .bind(assetmap_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("packages.find_by_assetmap"))
    }

    /// Look a package up by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_id(&self, id: Uuid) -> DataResult<Option<PackageRow>> {
        sqlx::query_as::<_, PackageRow>(SELECT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("packages.find_by_id"))
    }

    /// Resolve the package that lists the given CPL.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find_by_cpl(&self, cpl_uuid: Uuid) -> DataResult<Option<PackageRow>> {
        sqlx::query_as::<_, PackageRow>(SELECT_BY_CPL)
            .bind(cpl_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("packages.find_by_cpl"))
    }

    /// All packages, ordered for display.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> DataResult<Vec<PackageRow>> {
        sqlx::query_as::<_, PackageRow>(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(db("packages.list"))
    }

    /// Compositions of one package.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn compositions(&self, package_id: Uuid) -> DataResult<Vec<CompositionRow>> {
        sqlx::query_as::<_, CompositionRow>(SELECT_COMPOSITIONS)
            .bind(package_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("packages.compositions"))
    }

    /// Assets of one package.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn assets(&self, package_id: Uuid) -> DataResult<Vec<AssetRow>> {
        sqlx::query_as::<_, AssetRow>(SELECT_ASSETS)
            .bind(package_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db("packages.assets"))
    }
}
