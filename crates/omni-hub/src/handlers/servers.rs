//! Server identity, registration, and admin lifecycle handlers.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use omni_data::UpgradeStatus;
use omni_proto::{HeartbeatRequest, RegistrationRequest, RegistrationResponse, ServerAction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthedServer, ensure_self, registration_key_digest};
use crate::errors::{ApiError, ApiResult};
use crate::link::CommandChannel;
use crate::state::SharedState;

/// Server row shape exposed to the UI (the key digest stays private).
#[derive(Debug, Serialize)]
pub struct ServerView {
    /// Server identifier.
    pub id: Uuid,
    /// MAC address.
    pub mac: String,
    /// Display name.
    pub display_name: String,
    /// Location string.
    pub location: String,
    /// Site API base URL.
    pub api_url: String,
    /// Admin authorization flag.
    pub is_authorized: bool,
    /// Last contact timestamp.
    pub last_seen: Option<DateTime<Utc>>,
    /// Reported storage capacity.
    pub storage_capacity: Option<i64>,
    /// Reported software version.
    pub software_version: Option<String>,
    /// Reported package count.
    pub package_count: Option<i32>,
    /// Upgrade bookkeeping state.
    pub upgrade_status: String,
    /// Upgrade target version.
    pub target_version: Option<String>,
    /// NAT self-report.
    pub is_behind_nat: bool,
    /// Relay registration self-report.
    pub relay_registered: bool,
}

impl From<omni_data::ServerRow> for ServerView {
    fn from(row: omni_data::ServerRow) -> Self {
        Self {
            id: row.id,
            mac: row.mac,
            display_name: row.display_name,
            location: row.location,
            api_url: row.api_url,
            is_authorized: row.is_authorized,
            last_seen: row.last_seen,
            storage_capacity: row.storage_capacity,
            software_version: row.software_version,
            package_count: row.package_count,
            upgrade_status: row.upgrade_status,
            target_version: row.target_version,
            is_behind_nat: row.is_behind_nat,
            relay_registered: row.relay_registered,
        }
    }
}

/// `POST /servers/register`: open endpoint; the shared secret gates it.
pub async fn register(
    State(state): State<SharedState>,
    Json(request): Json<RegistrationRequest>,
) -> ApiResult<Json<RegistrationResponse>> {
    let servers = state.store.servers();
    let storage = request.storage_capacity.and_then(|v| i64::try_from(v).ok());

    if let Some(existing) = servers.find_by_mac(&request.mac).await? {
        // Re-registration must present the originally accepted key.
        if registration_key_digest(&request.registration_key) != existing.registration_key_hash {
            warn!(mac = %request.mac, "re-registration with mismatched key refused");
            return Err(ApiError::unauthorized("registration key mismatch"));
        }
        servers
            .refresh_registration(
                existing.id,
                &request.name,
                &request.location,
                &request.api_url,
                storage,
                Some(request.software_version.as_str()),
            )
            .await?;
        return Ok(Json(RegistrationResponse {
            server_id: existing.id,
            is_authorized: existing.is_authorized,
        }));
    }

    if request.registration_key != state.settings.registration_key {
        warn!(mac = %request.mac, "first registration with invalid key refused");
        return Err(ApiError::unauthorized("invalid registration key"));
    }

    let row = servers
        .create(
            &request.mac,
            &request.name,
            &request.location,
            &request.api_url,
            &registration_key_digest(&request.registration_key),
            storage,
            Some(request.software_version.as_str()),
        )
        .await?;
    info!(server_id = %row.id, mac = %row.mac, "new server registered; awaiting authorization");
    Ok(Json(RegistrationResponse {
        server_id: row.id,
        is_authorized: false,
    }))
}

/// `GET /servers`: admin listing.
pub async fn list(State(state): State<SharedState>) -> ApiResult<Json<Vec<ServerView>>> {
    let rows = state.store.servers().list().await?;
    Ok(Json(rows.into_iter().map(ServerView::from).collect()))
}

/// Body for `PUT /servers/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateServerBody {
    /// New display name.
    pub display_name: Option<String>,
    /// New location.
    pub location: Option<String>,
    /// New site API URL.
    pub api_url: Option<String>,
}

/// `PUT /servers/{id}`: admin metadata update.
pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateServerBody>,
) -> ApiResult<StatusCode> {
    state
        .store
        .servers()
        .update_display(
            id,
            body.display_name.as_deref(),
            body.location.as_deref(),
            body.api_url.as_deref(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /servers/{id}`: admin removal; dependent rows cascade.
pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.servers().delete(id).await?;
    info!(server_id = %id, "server deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

/// Body for `POST /servers/{id}/authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeBody {
    /// Desired authorization state.
    pub authorized: bool,
}

/// `POST /servers/{id}/authorize`: the explicit admin gate.
pub async fn authorize(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AuthorizeBody>,
) -> ApiResult<StatusCode> {
    state.store.servers().set_authorized(id, body.authorized).await?;
    info!(server_id = %id, authorized = body.authorized, "authorization updated");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /servers/{id}/heartbeat`: open to unauthorized rows.
pub async fn heartbeat(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(body): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    ensure_self(&authed, id)?;
    state
        .store
        .servers()
        .heartbeat(
            id,
            body.storage_capacity.and_then(|v| i64::try_from(v).ok()),
            body.software_version.as_deref(),
            body.package_count.and_then(|v| i32::try_from(v).ok()),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /servers/{id}/auth-status`: open to unauthorized rows so a site
/// can poll for its approval.
pub async fn auth_status(
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ensure_self(&authed, id)?;
    Ok(Json(json!({ "is_authorized": authed.0.is_authorized })))
}

/// Body for `POST /servers/{id}/upgrade`.
#[derive(Debug, Deserialize)]
pub struct UpgradeBody {
    /// Target version string.
    pub version: String,
}

/// `POST /servers/{id}/upgrade`: admin-triggered upgrade.
pub async fn upgrade(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpgradeBody>,
) -> ApiResult<StatusCode> {
    let servers = state.store.servers();
    if servers.find_by_id(id).await?.is_none() {
        return Err(ApiError::not_found("server not found"));
    }
    servers
        .set_upgrade(id, UpgradeStatus::Pending, Some(&body.version))
        .await?;
    state
        .store
        .commands()
        .create_action(id, "upgrade", Some(json!({ "version": body.version })))
        .await?;
    let channel = CommandChannel::new(state.links.clone());
    let route = channel
        .send_action(
            id,
            ServerAction::Upgrade {
                version: body.version.clone(),
            },
        )
        .await;
    info!(server_id = %id, version = %body.version, route = ?route, "upgrade dispatched");
    Ok(StatusCode::ACCEPTED)
}

/// `POST /servers/{id}/restart`: admin-triggered restart. A restart
/// addressed at the hub's own row executes in-process.
pub async fn restart(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.is_self(id) {
        info!("self restart requested; exiting after grace period");
        let restart = state.restart.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let _ = restart.send(true);
        });
        return Ok(StatusCode::ACCEPTED);
    }

    if state.store.servers().find_by_id(id).await?.is_none() {
        return Err(ApiError::not_found("server not found"));
    }
    state
        .store
        .commands()
        .create_action(id, "restart", None)
        .await?;
    let channel = CommandChannel::new(state.links.clone());
    channel.send_action(id, ServerAction::Restart).await;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /servers/{id}/rescan`: admin-triggered library rescan.
pub async fn rescan(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.store.servers().find_by_id(id).await?.is_none() {
        return Err(ApiError::not_found("server not found"));
    }
    state
        .store
        .commands()
        .create_action(id, "rescan", None)
        .await?;
    let channel = CommandChannel::new(state.links.clone());
    channel.send_action(id, ServerAction::Rescan).await;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /admin/db-reset`: wipe all state (admin only).
pub async fn db_reset(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    state.store.reset().await?;
    warn!("database reset performed by admin");
    Ok(StatusCode::NO_CONTENT)
}
