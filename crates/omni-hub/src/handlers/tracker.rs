//! Tracker endpoints: the announce itself and the live telemetry rollup.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, RawQuery, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::errors::ApiResult;
use crate::state::SharedState;

/// `GET /announce`: the BitTorrent tracker endpoint. Every request is
/// recorded in the announce audit, accepted or not.
pub async fn announce(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let raw = query.unwrap_or_default();
    let outcome = state.tracker.announce(&raw, peer.ip()).await;

    if let Some(audit) = &outcome.audit {
        if let Err(err) = state
            .store
            .announces()
            .record(
                &audit.info_hash,
                &audit.peer_id,
                &audit.ip,
                i32::from(audit.port),
                audit.event,
                outcome.ok,
                outcome.failure_reason.as_deref(),
            )
            .await
        {
            warn!(error = %err, "announce audit write failed");
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=binary")],
        outcome.body,
    )
}

/// Per-swarm rollup row for the live page.
#[derive(Debug, Serialize)]
pub struct SwarmRollup {
    /// Hex info hash.
    pub info_hash: String,
    /// Package display name, when the hash is registered.
    pub package_name: Option<String>,
    /// Live seeder count.
    pub seeders: u32,
    /// Live leecher count.
    pub leechers: u32,
    /// Member peers.
    pub peers: Vec<omni_tracker::PeerSnapshot>,
}

/// `GET /tracker/live` response body.
#[derive(Debug, Serialize)]
pub struct TrackerLive {
    /// Swarm count.
    pub active_swarms: usize,
    /// Total peer count.
    pub total_peers: usize,
    /// Announce interval in seconds.
    pub interval_sec: u64,
    /// Snapshot timestamp.
    pub generated_at: DateTime<Utc>,
    /// Per-swarm detail.
    pub swarms: Vec<SwarmRollup>,
    /// Recent announce attempts (audit tail).
    pub recent_announces: Vec<AnnounceView>,
}

/// One audit row in the live page.
#[derive(Debug, Serialize)]
pub struct AnnounceView {
    /// Hex info hash.
    pub info_hash: String,
    /// Hex peer id.
    pub peer_id: String,
    /// Announcing address.
    pub ip: String,
    /// Announcing port.
    pub port: i32,
    /// Event label.
    pub event: Option<String>,
    /// Outcome label.
    pub status: String,
    /// Failure detail.
    pub failure_reason: Option<String>,
    /// Timestamp.
    pub created_at: DateTime<Utc>,
}

/// `GET /tracker/live`: swarm snapshot plus audit tail.
pub async fn live(State(state): State<SharedState>) -> ApiResult<Json<TrackerLive>> {
    let snapshot = state.tracker.snapshot().await;

    // Resolve package names for registered hashes.
    let torrents = state.store.torrents().list().await?;
    let packages: HashMap<uuid::Uuid, String> = state
        .store
        .packages()
        .list()
        .await?
        .into_iter()
        .map(|p| (p.id, p.package_name))
        .collect();
    let names: HashMap<String, String> = torrents
        .into_iter()
        .filter_map(|t| {
            packages
                .get(&t.package_id)
                .map(|name| (t.info_hash, name.clone()))
        })
        .collect();

    let swarms = snapshot
        .swarms
        .into_iter()
        .map(|swarm| SwarmRollup {
            package_name: names.get(&swarm.info_hash).cloned(),
            info_hash: swarm.info_hash,
            seeders: swarm.seeders,
            leechers: swarm.leechers,
            peers: swarm.peers,
        })
        .collect();

    let recent = state.store.announces().recent(100).await?;

    Ok(Json(TrackerLive {
        active_swarms: snapshot.active_swarms,
        total_peers: snapshot.total_peers,
        interval_sec: snapshot.interval_sec,
        generated_at: snapshot.generated_at,
        swarms,
        recent_announces: recent
            .into_iter()
            .map(|row| AnnounceView {
                info_hash: row.info_hash,
                peer_id: row.peer_id,
                ip: row.ip,
                port: row.port,
                event: row.event,
                status: row.status,
                failure_reason: row.failure_reason,
                created_at: row.created_at,
            })
            .collect(),
    }))
}

/// `GET /install`: the site bootstrap script.
pub async fn install_script(State(state): State<SharedState>) -> impl IntoResponse {
    let script = format!(
        "#!/bin/sh\n\
         # OmniCloud site bootstrap.\n\
         set -eu\n\
         HUB_URL=\"${{HUB_URL:-http://$(hostname):9080}}\"\n\
         VERSION=\"{version}\"\n\
         TARBALL=\"omnicloud-${{VERSION}}-linux-amd64.tar.gz\"\n\
         curl -fsSL \"${{HUB_URL}}/releases/${{TARBALL}}\" -o \"/tmp/${{TARBALL}}\"\n\
         tar -xzf \"/tmp/${{TARBALL}}\" -C /opt\n\
         /opt/omnicloud/omnicloud --config /etc/omnicloud/auth.config\n",
        version = state.settings.version
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/x-shellscript")],
        script,
    )
}
