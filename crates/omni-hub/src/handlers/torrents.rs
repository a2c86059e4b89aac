//! Torrent registry handlers: registration, listing, blob serving.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use omni_proto::{RegisterTorrentRequest, RegisterTorrentResponse};
use omni_torrent::{InfoHash, rewrite_announce};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthedServer;
use crate::errors::{ApiError, ApiResult};
use crate::state::SharedState;

/// Torrent row shape exposed to the UI.
#[derive(Debug, Serialize)]
pub struct TorrentView {
    /// Torrent identifier.
    pub id: Uuid,
    /// Package identifier.
    pub package_id: Uuid,
    /// Package display name.
    pub package_name: String,
    /// Hex info hash.
    pub info_hash: String,
    /// Piece size in bytes.
    pub piece_size: i64,
    /// Piece count.
    pub total_pieces: i64,
    /// File count.
    pub file_count: i32,
    /// Total payload size.
    pub total_size_bytes: i64,
    /// Generating server, when still known.
    pub created_by_server: Option<Uuid>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Count of servers holding the full content.
    pub seeder_count: i64,
}

/// `GET /torrents`: registry listing.
pub async fn list(State(state): State<SharedState>) -> ApiResult<Json<Vec<TorrentView>>> {
    let torrents = state.store.torrents().list().await?;
    let packages: HashMap<Uuid, String> = state
        .store
        .packages()
        .list()
        .await?
        .into_iter()
        .map(|p| (p.id, p.package_name))
        .collect();

    let mut views = Vec::with_capacity(torrents.len());
    for torrent in torrents {
        let seeder_count = state.store.seeders().holder_count(torrent.id).await?;
        views.push(TorrentView {
            package_name: packages
                .get(&torrent.package_id)
                .cloned()
                .unwrap_or_default(),
            id: torrent.id,
            package_id: torrent.package_id,
            info_hash: torrent.info_hash,
            piece_size: torrent.piece_size,
            total_pieces: torrent.total_pieces,
            file_count: torrent.file_count,
            total_size_bytes: torrent.total_size_bytes,
            created_by_server: torrent.created_by_server,
            created_at: torrent.created_at,
            seeder_count,
        });
    }
    Ok(Json(views))
}

/// `POST /torrents`: register a generated torrent. Idempotent on
/// `info_hash`: the uploader becomes a seeder, its queue row completes,
/// and canonical non-MXF bytes are stored for the XML exchange.
pub async fn register(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Json(request): Json<RegisterTorrentRequest>,
) -> ApiResult<Json<RegisterTorrentResponse>> {
    let info_hash: InfoHash = request
        .info_hash
        .parse()
        .map_err(|_| ApiError::bad_request("malformed info hash"))?;

    let Some(package) = state
        .store
        .packages()
        .find_by_assetmap(request.assetmap_uuid)
        .await?
    else {
        return Err(ApiError::not_found("unknown assetmap uuid"));
    };

    let (torrent, created) = state
        .store
        .torrents()
        .register(
            package.id,
            &info_hash.to_hex(),
            i64::try_from(request.piece_size).unwrap_or(i64::MAX),
            i64::try_from(request.total_pieces).unwrap_or(i64::MAX),
            i32::try_from(request.file_count).unwrap_or(i32::MAX),
            i64::try_from(request.total_size).unwrap_or(i64::MAX),
            authed.0.id,
            &request.torrent_bytes,
        )
        .await?;

    if !request.canonical_files.is_empty() {
        let files: Vec<(String, Vec<u8>)> = request
            .canonical_files
            .iter()
            .map(|file| (file.relative_path.clone(), file.bytes.clone()))
            .collect();
        state
            .store
            .torrents()
            .save_canonical_files(package.id, &files)
            .await?;
    }

    // The uploading server holds the content and seeds from now on.
    state
        .store
        .seeders()
        .upsert(torrent.id, authed.0.id, omni_data::SeederStatus::Seeding, 0)
        .await?;
    state
        .store
        .queue()
        .mark_completed(package.id, authed.0.id)
        .await?;

    if created {
        info!(
            torrent_id = %torrent.id,
            info_hash = %info_hash,
            package = %package.package_name,
            server_id = %authed.0.id,
            "torrent registered"
        );
    } else {
        warn!(
            torrent_id = %torrent.id,
            info_hash = %info_hash,
            "duplicate torrent registration; metadata refreshed"
        );
    }

    Ok(Json(RegisterTorrentResponse {
        torrent_id: torrent.id,
        created,
    }))
}

/// `GET /torrents/{info_hash}/file`: the stored blob with its announce
/// URL rewritten to this hub as seen by the caller.
pub async fn fetch_file(
    State(state): State<SharedState>,
    Path(info_hash): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let parsed: InfoHash = info_hash
        .parse()
        .map_err(|_| ApiError::bad_request("malformed info hash"))?;
    let blob = state.store.torrents().fetch_file(&parsed.to_hex()).await?;

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value).to_string())
        .unwrap_or_else(|| "localhost".to_string());
    let announce = format!("http://{host}:{}/announce", state.settings.tracker_port);
    let rewritten = rewrite_announce(&blob, &announce)
        .map_err(|err| ApiError::internal(format!("stored torrent is unreadable: {err}")))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/x-bittorrent".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.torrent\"", parsed.to_hex()),
            ),
        ],
        rewritten,
    ))
}
