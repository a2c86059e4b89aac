//! Torrent-generation arbitration and queue administration.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use omni_proto::{ClaimRequest, HashAction, HashCheckRequest, HashCheckResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{AuthedServer, ensure_self};
use crate::errors::{ApiError, ApiResult};
use crate::state::SharedState;

/// `POST /servers/{id}/hash-check`: the fleet-wide decision rule: one
/// generator, everyone else waits or downloads.
pub async fn hash_check(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(request): Json<HashCheckRequest>,
) -> ApiResult<Json<HashCheckResponse>> {
    ensure_self(&authed, id)?;

    let Some(package) = state
        .store
        .packages()
        .find_by_assetmap(request.assetmap_uuid)
        .await?
    else {
        return Err(ApiError::not_found("unknown assetmap uuid"));
    };

    if let Some(torrent) = state.store.torrents().find_by_package(package.id).await? {
        return Ok(Json(HashCheckResponse {
            action: HashAction::Download,
            package_id: package.id,
            hashing_server: None,
            progress: None,
            info_hash: Some(torrent.info_hash),
        }));
    }

    if let Some(generating) = state.store.queue().generating_for(package.id).await? {
        return Ok(Json(HashCheckResponse {
            action: HashAction::Wait,
            package_id: package.id,
            hashing_server: Some(generating.display_name),
            progress: Some(generating.progress_percent),
            info_hash: None,
        }));
    }

    // A claim without a generating row yet still means "someone else".
    if let Some(claim) = state.store.queue().claim_holder(package.id).await? {
        if claim.server_id != id {
            let holder = state.store.servers().find_by_id(claim.server_id).await?;
            return Ok(Json(HashCheckResponse {
                action: HashAction::Wait,
                package_id: package.id,
                hashing_server: holder.map(|s| s.display_name),
                progress: None,
                info_hash: None,
            }));
        }
    }

    debug!(server_id = %id, package = %package.id, "hash check: go ahead and hash");
    Ok(Json(HashCheckResponse {
        action: HashAction::Hash,
        package_id: package.id,
        hashing_server: None,
        progress: None,
        info_hash: None,
    }))
}

/// `POST /servers/{id}/torrent-queue/claim`: atomic fleet-wide claim;
/// losing the race surfaces as 409.
pub async fn claim(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<StatusCode> {
    ensure_self(&authed, id)?;
    if state
        .store
        .packages()
        .find_by_id(request.package_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("unknown package"));
    }
    state.store.queue().claim(request.package_id, id).await?;
    info!(server_id = %id, package = %request.package_id, "generation claim granted");
    Ok(StatusCode::OK)
}

/// Queue row shape exposed to the UI.
#[derive(Debug, Serialize)]
pub struct QueueItemView {
    /// Row identifier.
    pub id: Uuid,
    /// Package identifier.
    pub package_id: Uuid,
    /// Package display name.
    pub package_name: String,
    /// Owning server identifier.
    pub server_id: Uuid,
    /// Owning server display name.
    pub server_name: String,
    /// Queue state label.
    pub status: String,
    /// Hashing progress percentage.
    pub progress_percent: f64,
    /// File currently being hashed.
    pub current_file: Option<String>,
    /// Total payload size.
    pub total_size: i64,
    /// Observed hashing speed.
    pub hashing_speed_bps: Option<i64>,
    /// Reorder position.
    pub position: i32,
    /// Error detail.
    pub error_message: Option<String>,
    /// Enqueue timestamp.
    pub queued_at: DateTime<Utc>,
    /// Generation start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

/// `GET /torrent-queue`: queue listing for the UI.
pub async fn list(State(state): State<SharedState>) -> ApiResult<Json<Vec<QueueItemView>>> {
    let rows = state.store.queue().list().await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| QueueItemView {
                id: row.id,
                package_id: row.package_id,
                package_name: row.package_name,
                server_id: row.server_id,
                server_name: row.server_name,
                status: row.status,
                progress_percent: row.progress_percent,
                current_file: row.current_file,
                total_size: row.total_size,
                hashing_speed_bps: row.hashing_speed_bps,
                position: row.position,
                error_message: row.error_message,
                queued_at: row.queued_at,
                started_at: row.started_at,
                completed_at: row.completed_at,
            })
            .collect(),
    ))
}

/// `POST /torrent-queue/{id}/retry`: reset a failed/cancelled row.
pub async fn retry(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let row = state.store.queue().retry(id).await?;
    info!(queue_id = %id, package = %row.package_id, "queue row reset to queued");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /torrent-queue/{id}/cancel`: cancel a queued/generating row and
/// release the claim.
pub async fn cancel(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let row = state.store.queue().cancel(id).await?;
    info!(queue_id = %id, package = %row.package_id, "queue row cancelled");
    Ok(StatusCode::NO_CONTENT)
}

/// Body for `POST /torrent-queue/{id}/reorder`.
#[derive(Debug, Deserialize)]
pub struct ReorderBody {
    /// New position among queued rows.
    pub position: i32,
}

/// `POST /torrent-queue/{id}/reorder`: allowed only within `queued`.
pub async fn reorder(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReorderBody>,
) -> ApiResult<StatusCode> {
    state.store.queue().reorder(id, body.position).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /torrent-queue/clear-completed`.
pub async fn clear_completed(State(state): State<SharedState>) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.store.queue().clear_completed().await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}
