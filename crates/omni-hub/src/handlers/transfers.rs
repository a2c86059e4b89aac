//! Transfer orchestration handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use omni_proto::{DeliveryRoute, TransferCommand, TransferCommandKind};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::{ApiError, ApiResult};
use crate::link::CommandChannel;
use crate::state::SharedState;

/// Transfer row shape exposed to the UI.
#[derive(Debug, Serialize)]
pub struct TransferView {
    /// Transfer identifier.
    pub id: Uuid,
    /// Torrent identifier.
    pub torrent_id: Uuid,
    /// Hex info hash.
    pub info_hash: String,
    /// Package display name.
    pub package_name: String,
    /// Package ASSETMAP UUID.
    pub assetmap_uuid: Uuid,
    /// Destination server identifier.
    pub destination_server_id: Uuid,
    /// Destination display name.
    pub destination_name: String,
    /// Pinned source server, when set.
    pub source_server_id: Option<Uuid>,
    /// Pinned source display name.
    pub source_name: Option<String>,
    /// Requester label.
    pub requested_by: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Transfer state label.
    pub status: String,
    /// Completion percentage.
    pub progress_percent: f64,
    /// Bytes downloaded.
    pub downloaded_bytes: i64,
    /// Total bytes expected.
    pub total_size_bytes: i64,
    /// Download speed.
    pub download_speed_bps: i64,
    /// Upload speed.
    pub upload_speed_bps: i64,
    /// Connected peers.
    pub peers_connected: i32,
    /// Estimated seconds to completion.
    pub eta_seconds: Option<i64>,
    /// Pending command awaiting ack.
    pub pending_command: Option<String>,
    /// Whether the last command was acknowledged.
    pub command_acknowledged: bool,
    /// Error detail.
    pub error_message: Option<String>,
    /// First activity timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// `GET /transfers`.
pub async fn list(State(state): State<SharedState>) -> ApiResult<Json<Vec<TransferView>>> {
    let rows = state.store.transfers().list().await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| TransferView {
                id: row.id,
                torrent_id: row.torrent_id,
                info_hash: row.info_hash,
                package_name: row.package_name,
                assetmap_uuid: row.assetmap_uuid,
                destination_server_id: row.destination_server_id,
                destination_name: row.destination_name,
                source_server_id: row.source_server_id,
                source_name: row.source_name,
                requested_by: row.requested_by,
                priority: row.priority,
                status: row.status,
                progress_percent: row.progress_percent,
                downloaded_bytes: row.downloaded_bytes,
                total_size_bytes: row.total_size_bytes,
                download_speed_bps: row.download_speed_bps,
                upload_speed_bps: row.upload_speed_bps,
                peers_connected: row.peers_connected,
                eta_seconds: row.eta_seconds,
                pending_command: row.pending_command,
                command_acknowledged: row.command_acknowledged,
                error_message: row.error_message,
                started_at: row.started_at,
                completed_at: row.completed_at,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect(),
    ))
}

/// Body for `POST /transfers`.
#[derive(Debug, Deserialize)]
pub struct CreateTransferBody {
    /// Torrent identifier (alternative to `info_hash`).
    pub torrent_id: Option<Uuid>,
    /// Hex info hash (alternative to `torrent_id`).
    pub info_hash: Option<String>,
    /// Destination server.
    pub destination_server_id: Uuid,
    /// Optional pinned source server.
    pub source_server_id: Option<Uuid>,
    /// Requester label for the audit trail.
    #[serde(default)]
    pub requested_by: Option<String>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: i32,
}

/// `POST /transfers`: create a queued transfer for a destination site.
pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateTransferBody>,
) -> ApiResult<(StatusCode, Json<TransferView>)> {
    let torrent = match (body.torrent_id, body.info_hash.as_deref()) {
        (Some(id), _) => state.store.torrents().find_by_id(id).await?,
        (None, Some(hash)) => state.store.torrents().find_by_info_hash(hash).await?,
        (None, None) => {
            return Err(ApiError::bad_request(
                "torrent_id or info_hash is required",
            ));
        }
    }
    .ok_or_else(|| ApiError::not_found("unknown torrent"))?;

    if state
        .store
        .servers()
        .find_by_id(body.destination_server_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("unknown destination server"));
    }

    let row = state
        .store
        .transfers()
        .create(
            torrent.id,
            body.destination_server_id,
            body.source_server_id,
            body.requested_by.as_deref().unwrap_or("admin"),
            body.priority,
            torrent.total_size_bytes,
        )
        .await?;
    info!(
        transfer_id = %row.id,
        torrent_id = %torrent.id,
        destination = %body.destination_server_id,
        "transfer created"
    );

    let views = self::list(State(state)).await?;
    let view = views
        .0
        .into_iter()
        .find(|v| v.id == row.id)
        .ok_or_else(|| ApiError::internal("created transfer vanished"))?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Body for `PUT /transfers/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateTransferBody {
    /// New priority.
    pub priority: Option<i32>,
    /// New pinned source.
    pub source_server_id: Option<Uuid>,
}

/// `PUT /transfers/{id}`: scheduling update.
pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTransferBody>,
) -> ApiResult<StatusCode> {
    state
        .store
        .transfers()
        .update_scheduling(id, body.priority, body.source_server_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn dispatch_command(
    state: &SharedState,
    id: Uuid,
    kind: TransferCommandKind,
    delete_data: bool,
) -> ApiResult<DeliveryRoute> {
    let command_label = match kind {
        TransferCommandKind::Pause => "pause",
        TransferCommandKind::Resume => "resume",
        TransferCommandKind::Cancel => "cancel",
    };
    // Persist first: the row is the durable at-least-once substrate.
    state
        .store
        .transfers()
        .request_command(id, command_label, delete_data)
        .await?;

    let transfer = state
        .store
        .transfers()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("unknown transfer"))?;
    let torrent = state
        .store
        .torrents()
        .find_by_id(transfer.torrent_id)
        .await?
        .ok_or_else(|| ApiError::internal("transfer references a missing torrent"))?;

    let channel = CommandChannel::new(state.links.clone());
    let route = channel
        .send_transfer_command(
            transfer.destination_server_id,
            TransferCommand {
                transfer_id: id,
                info_hash: torrent.info_hash,
                command: kind,
                delete_data,
            },
        )
        .await;
    info!(transfer_id = %id, command = command_label, route = ?route, "transfer command dispatched");
    Ok(route)
}

/// `POST /transfers/{id}/pause`.
pub async fn pause(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let route = dispatch_command(&state, id, TransferCommandKind::Pause, false).await?;
    Ok(Json(serde_json::json!({ "delivered_via": route })))
}

/// `POST /transfers/{id}/resume`.
pub async fn resume(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let route = dispatch_command(&state, id, TransferCommandKind::Resume, false).await?;
    Ok(Json(serde_json::json!({ "delivered_via": route })))
}

/// `POST /transfers/{id}/retry`: only error/failed/cancelled rows.
pub async fn retry(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.transfers().retry(id).await?;
    info!(transfer_id = %id, "transfer reset to queued");
    Ok(StatusCode::NO_CONTENT)
}

/// Query for `DELETE /transfers/{id}`.
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Whether the destination should remove on-disk data.
    #[serde(default)]
    pub delete_data: bool,
}

/// `DELETE /transfers/{id}?delete_data=`: cancel an active transfer (the
/// destination stops it and optionally deletes data), or drop a terminal
/// row outright.
pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    let transfer = state
        .store
        .transfers()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("unknown transfer"))?;
    let status = omni_data::TransferStatus::parse(&transfer.status)?;

    if status.is_terminal() || matches!(status, omni_data::TransferStatus::Error | omni_data::TransferStatus::Failed) {
        state.store.transfers().delete_row(id).await?;
        return Ok(StatusCode::NO_CONTENT);
    }

    dispatch_command(&state, id, TransferCommandKind::Cancel, query.delete_data).await?;
    Ok(StatusCode::ACCEPTED)
}
