//! Canonical-XML exchange: a site holding byte-divergent XML fetches the
//! canonical non-MXF files so its on-disk tree matches the published
//! info-hash.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use omni_proto::{CanonicalFile, CanonicalXmlRequest, CanonicalXmlResponse};
use tracing::debug;
use uuid::Uuid;

use crate::auth::{AuthedServer, ensure_self};
use crate::errors::{ApiError, ApiResult};
use crate::state::SharedState;

/// `POST /servers/{id}/canonical-xml`.
pub async fn canonical_xml(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(request): Json<CanonicalXmlRequest>,
) -> ApiResult<Json<CanonicalXmlResponse>> {
    ensure_self(&authed, id)?;

    let Some(package) = state.store.packages().find_by_cpl(request.cpl_uuid).await? else {
        return Err(ApiError::not_found("no package lists this CPL"));
    };
    let Some(torrent) = state.store.torrents().find_by_package(package.id).await? else {
        return Err(ApiError::not_found(
            "package has no published torrent yet; wait for the generator",
        ));
    };

    let torrent_file = state
        .store
        .torrents()
        .fetch_file(&torrent.info_hash)
        .await?;
    let files = state.store.torrents().canonical_files(package.id).await?;

    debug!(
        server_id = %id,
        package = %package.package_name,
        files = files.len(),
        "canonical XML served"
    );

    Ok(Json(CanonicalXmlResponse {
        package_id: package.id,
        assetmap_uuid: package.assetmap_uuid,
        info_hash: torrent.info_hash,
        torrent_file,
        files: files
            .into_iter()
            .map(|(relative_path, bytes)| CanonicalFile {
                relative_path,
                bytes,
            })
            .collect(),
    }))
}
