//! Poll and ack endpoints of the command channel.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use omni_data::UpgradeStatus;
use omni_proto::{
    ActionDone, CommandResult, ContentCommand, ContentCommandAck, PendingTransfer, ServerAction,
    TransferCommand, TransferCommandAck, TransferCommandKind,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthedServer, ensure_self};
use crate::errors::{ApiError, ApiResult};
use crate::state::SharedState;

/// `GET /servers/{id}/pending-action`: the oldest outstanding server
/// action, or `null`.
pub async fn pending_action(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Option<ServerAction>>> {
    ensure_self(&authed, id)?;
    let Some(row) = state.store.commands().pending_action(id).await? else {
        return Ok(Json(None));
    };
    let action = match row.action.as_str() {
        "upgrade" => {
            let version = row
                .payload
                .as_ref()
                .and_then(|p| p.get("version"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            ServerAction::Upgrade { version }
        }
        "restart" => ServerAction::Restart,
        "rescan" => ServerAction::Rescan,
        other => {
            warn!(action = %other, "unknown parked action; dropping");
            return Ok(Json(None));
        }
    };
    Ok(Json(Some(action)))
}

/// `GET /servers/{id}/pending-transfers`: queued assignments.
pub async fn pending_transfers(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PendingTransfer>>> {
    ensure_self(&authed, id)?;
    let rows = state.store.transfers().pending_for(id).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| PendingTransfer {
                transfer_id: row.transfer_id,
                info_hash: row.info_hash,
                assetmap_uuid: row.assetmap_uuid,
                total_size_bytes: u64::try_from(row.total_size_bytes).unwrap_or_default(),
            })
            .collect(),
    ))
}

/// `GET /servers/{id}/transfer-commands`: undelivered pause/resume/
/// cancel commands.
pub async fn transfer_commands(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<TransferCommand>>> {
    ensure_self(&authed, id)?;
    let rows = state.store.transfers().commands_for(id).await?;
    let mut commands = Vec::with_capacity(rows.len());
    for row in rows {
        let kind = match row.pending_command.as_deref() {
            Some("pause") => TransferCommandKind::Pause,
            Some("resume") => TransferCommandKind::Resume,
            Some("cancel") => TransferCommandKind::Cancel,
            other => {
                warn!(command = ?other, "unknown pending command label; skipped");
                continue;
            }
        };
        commands.push(TransferCommand {
            transfer_id: row.transfer_id,
            info_hash: row.info_hash,
            command: kind,
            delete_data: row.delete_data,
        });
    }
    Ok(Json(commands))
}

/// `GET /servers/{id}/content-commands`: undelivered content commands.
pub async fn content_commands(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ContentCommand>>> {
    ensure_self(&authed, id)?;
    let rows = state.store.commands().pending_content_commands(id).await?;
    let mut commands = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(package) = state.store.packages().find_by_id(row.package_id).await? else {
            warn!(command_id = %row.command_id, "content command references a missing package");
            continue;
        };
        commands.push(ContentCommand {
            command_id: row.command_id,
            assetmap_uuid: package.assetmap_uuid,
            action: row.action,
        });
    }
    Ok(Json(commands))
}

/// `POST /servers/{id}/transfer-command-ack`: clears the pending command
/// and finalises deletion bookkeeping.
pub async fn transfer_command_ack(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(ack): Json<TransferCommandAck>,
) -> ApiResult<StatusCode> {
    ensure_self(&authed, id)?;
    let succeeded = ack.result != CommandResult::Error;
    let transfer = state
        .store
        .transfers()
        .ack_command(ack.transfer_id, succeeded)
        .await?;

    if ack.result == CommandResult::Deleted {
        // Cancel-with-delete: the destination no longer holds the content.
        let Some(torrent) = state
            .store
            .torrents()
            .find_by_id(transfer.torrent_id)
            .await?
        else {
            return Err(ApiError::internal("transfer references a missing torrent"));
        };
        state.store.seeders().delete(torrent.id, id).await?;
        state
            .store
            .inventory()
            .delete(id, torrent.package_id)
            .await?;
        info!(
            transfer_id = %ack.transfer_id,
            server_id = %id,
            "content deleted at destination; inventory and seeder rows dropped"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /servers/{id}/content-command-ack`.
pub async fn content_command_ack(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(ack): Json<ContentCommandAck>,
) -> ApiResult<StatusCode> {
    ensure_self(&authed, id)?;
    let result_label = match ack.result {
        CommandResult::Done => "done",
        CommandResult::Deleted => "deleted",
        CommandResult::Kept => "kept",
        CommandResult::Error => "error",
    };
    let row = state
        .store
        .commands()
        .ack_content_command(ack.command_id, result_label, ack.message.as_deref())
        .await?;

    if ack.result == CommandResult::Deleted {
        state.store.inventory().delete(id, row.package_id).await?;
        if let Some(torrent) = state
            .store
            .torrents()
            .find_by_package(row.package_id)
            .await?
        {
            state.store.seeders().delete(torrent.id, id).await?;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /servers/{id}/action-done`: completion report for a server
/// action; upgrade outcomes update the server row.
pub async fn action_done(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(done): Json<ActionDone>,
) -> ApiResult<StatusCode> {
    ensure_self(&authed, id)?;
    state
        .store
        .commands()
        .ack_actions(id, &done.action, done.success, done.message.as_deref())
        .await?;

    if done.action == "upgrade" {
        let status = if done.success {
            UpgradeStatus::Success
        } else {
            UpgradeStatus::Failed
        };
        state.store.servers().set_upgrade(id, status, None).await?;
    }

    info!(
        server_id = %id,
        action = %done.action,
        success = done.success,
        "action completion recorded"
    );
    Ok(StatusCode::NO_CONTENT)
}
