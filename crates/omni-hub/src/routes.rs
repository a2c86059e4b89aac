//! Router construction and server host for the hub API.

use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{
    require_admin, require_known_server, require_server, require_server_or_admin,
};
use crate::handlers::{
    canonical, commands, health, inventory, queue, reports, servers, torrents, tracker, transfers,
};
use crate::state::SharedState;

/// Assemble the full hub router.
#[must_use]
pub fn build_router(state: SharedState) -> Router {
    let open = Router::new()
        .route("/announce", get(tracker::announce))
        .route("/install", get(tracker::install_script))
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/servers/register", post(servers::register));

    // Reachable before admin authorization: a new site needs to heartbeat
    // and poll its approval state.
    let known = Router::new()
        .route("/api/v1/servers/{id}/heartbeat", post(servers::heartbeat))
        .route("/api/v1/servers/{id}/auth-status", get(servers::auth_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_known_server,
        ));

    let site = Router::new()
        .route("/api/v1/servers/{id}/inventory", post(inventory::ingest))
        .route("/api/v1/servers/{id}/torrent-status", post(reports::ingest))
        .route("/api/v1/servers/{id}/hash-check", post(queue::hash_check))
        .route(
            "/api/v1/servers/{id}/torrent-queue/claim",
            post(queue::claim),
        )
        .route(
            "/api/v1/servers/{id}/canonical-xml",
            post(canonical::canonical_xml),
        )
        .route(
            "/api/v1/servers/{id}/pending-action",
            get(commands::pending_action),
        )
        .route(
            "/api/v1/servers/{id}/pending-transfers",
            get(commands::pending_transfers),
        )
        .route(
            "/api/v1/servers/{id}/transfer-commands",
            get(commands::transfer_commands),
        )
        .route(
            "/api/v1/servers/{id}/content-commands",
            get(commands::content_commands),
        )
        .route(
            "/api/v1/servers/{id}/transfer-command-ack",
            post(commands::transfer_command_ack),
        )
        .route(
            "/api/v1/servers/{id}/content-command-ack",
            post(commands::content_command_ack),
        )
        .route("/api/v1/servers/{id}/action-done", post(commands::action_done))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_server,
        ));

    // The torrent registry is shared: sites register and fetch blobs, the
    // UI lists them.
    let registry = Router::new()
        .route(
            "/api/v1/torrents",
            get(torrents::list).post(torrents::register),
        )
        .route(
            "/api/v1/torrents/{info_hash}/file",
            get(torrents::fetch_file),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_server_or_admin,
        ));

    let admin = Router::new()
        .route("/api/v1/servers", get(servers::list))
        .route(
            "/api/v1/servers/{id}",
            put(servers::update).delete(servers::delete),
        )
        .route("/api/v1/servers/{id}/authorize", post(servers::authorize))
        .route("/api/v1/servers/{id}/upgrade", post(servers::upgrade))
        .route("/api/v1/servers/{id}/restart", post(servers::restart))
        .route("/api/v1/servers/{id}/rescan", post(servers::rescan))
        .route("/api/v1/admin/db-reset", post(servers::db_reset))
        .route("/api/v1/torrent-queue", get(queue::list))
        .route("/api/v1/torrent-queue/{id}/retry", post(queue::retry))
        .route("/api/v1/torrent-queue/{id}/cancel", post(queue::cancel))
        .route("/api/v1/torrent-queue/{id}/reorder", post(queue::reorder))
        .route(
            "/api/v1/torrent-queue/clear-completed",
            post(queue::clear_completed),
        )
        .route(
            "/api/v1/transfers",
            get(transfers::list).post(transfers::create),
        )
        .route(
            "/api/v1/transfers/{id}",
            put(transfers::update).delete(transfers::delete),
        )
        .route("/api/v1/transfers/{id}/pause", post(transfers::pause))
        .route("/api/v1/transfers/{id}/resume", post(transfers::resume))
        .route("/api/v1/transfers/{id}/retry", post(transfers::retry))
        .route("/api/v1/tracker/live", get(tracker::live))
        .route_layer(middleware::from_fn(require_admin));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(open)
        .merge(known)
        .merge(site)
        .merge(registry)
        .merge(admin)
        .nest_service(
            "/releases",
            ServeDir::new(state.settings.releases_dir.clone()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// A minimal router carrying only the announce endpoint, served on the
/// dedicated tracker port.
#[must_use]
pub fn build_tracker_router(state: SharedState) -> Router {
    Router::new()
        .route("/announce", get(tracker::announce))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router, preserving peer addresses for the tracker.
///
/// # Errors
///
/// Returns an error if the listener fails to bind or the server dies.
pub async fn serve(router: Router, addr: SocketAddr) -> std::io::Result<()> {
    info!(addr = %addr, "hub API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
