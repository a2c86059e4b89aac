//! Application boot sequence for both deployment roles.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use omni_config::{DEFAULT_CONFIG_PATH, ServerMode, Settings};
use omni_data::Store;
use omni_dcp::ScrapeParser;
use omni_hub::{HubSettings, HubState, LinkRegistry};
use omni_site::SiteRuntime;
use omni_telemetry::{LoggingConfig, app_version, init_logging};
use omni_torrent::{EngineLimits, InertEngine, PieceEngine};
use omni_tracker::{Tracker, TrackerConfig};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, bind_error};

/// OmniCloud: distributed DCP distribution fabric (hub or site).
#[derive(Debug, Parser)]
#[command(name = "omnicloud", version)]
struct Args {
    /// Path to the key=value configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, env = "OMNICLOUD_CONFIG")]
    config: PathBuf,
}

/// Entry point for the boot sequence.
///
/// # Errors
///
/// Returns an error mapped onto the documented exit codes.
pub async fn run() -> AppResult<()> {
    let args = Args::parse();

    init_logging(&LoggingConfig::default()).map_err(|err| AppError::Telemetry {
        detail: err.to_string(),
    })?;

    let settings =
        omni_config::load_settings(&args.config).map_err(|source| AppError::Config { source })?;
    info!(
        mode = settings.mode.as_str(),
        api_port = settings.api_port,
        "configuration loaded"
    );

    match settings.mode {
        ServerMode::Hub => run_hub(settings).await,
        ServerMode::Site => run_site(settings).await,
    }
}

async fn run_hub(settings: Settings) -> AppResult<()> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&settings.database.connect_url())
        .await
        .map_err(|source| AppError::Database { source })?;
    let store = Store::new(pool)
        .await
        .map_err(|source| AppError::Migration { source })?;
    info!("database ready");

    let tracker = Arc::new(Tracker::new(TrackerConfig::default()));
    let links = Arc::new(LinkRegistry::new());
    let (self_id_tx, self_id_rx) = watch::channel(None);
    let (restart_tx, mut restart_rx) = watch::channel(false);

    let self_id = ensure_self_row(&store, &settings).await?;
    let _ = self_id_tx.send(Some(self_id));

    let state = HubState::new(
        store.clone(),
        Arc::clone(&tracker),
        Arc::clone(&links),
        HubSettings::from_settings(&settings, app_version()),
        self_id_rx,
        restart_tx,
    );

    std::fs::create_dir_all(&state.settings.releases_dir).ok();

    let sweeper = tracker.spawn_sweeper();
    let reaper = omni_hub::spawn_generation_reaper(store.clone());

    let link_addr: SocketAddr = ([0, 0, 0, 0], settings.link_port).into();
    let link_task = omni_hub::spawn_link_listener(link_addr, Arc::clone(&links), store.clone())
        .await
        .map_err(|source| bind_error(link_addr, source))?;

    let api_addr: SocketAddr = ([0, 0, 0, 0], settings.api_port).into();
    let tracker_addr: SocketAddr = ([0, 0, 0, 0], settings.tracker_port).into();
    let api_router = omni_hub::build_router(state.clone());
    let tracker_router = omni_hub::build_tracker_router(state);

    let api_server = tokio::spawn(omni_hub::routes::serve(api_router, api_addr));
    let tracker_server = tokio::spawn(omni_hub::routes::serve(tracker_router, tracker_addr));

    info!(
        api = %api_addr,
        tracker = %tracker_addr,
        link = %link_addr,
        "hub running"
    );

    let result = tokio::select! {
        outcome = api_server => flatten_serve(outcome, api_addr),
        outcome = tracker_server => flatten_serve(outcome, tracker_addr),
        _ = restart_rx.changed() => {
            info!("restart signal received; shutting down for the service manager");
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    sweeper.abort();
    reaper.abort();
    link_task.abort();
    result
}

async fn run_site(settings: Settings) -> AppResult<()> {
    // The piece-transfer engine is pluggable; the built-in engine keeps
    // local bookkeeping while transport runs in the engine collaborator.
    let engine: Arc<dyn PieceEngine> = Arc::new(InertEngine::new());
    engine
        .set_limits(EngineLimits {
            max_upload_rate: settings.limits.max_upload_rate,
            max_download_rate: settings.limits.max_download_rate,
            max_concurrent_seeds: settings.limits.max_concurrent_seeds,
            max_concurrent_downloads: settings.limits.max_concurrent_downloads,
        })
        .await;
    let parser = Arc::new(ScrapeParser);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runtime = SiteRuntime::start(
        &settings,
        engine,
        parser,
        app_version(),
        shutdown_rx,
    )
    .await
    .map_err(|source| AppError::Site { source })?;

    let mut restart = runtime.restart.clone();
    tokio::select! {
        _ = restart.changed() => {
            info!("restart command received; exiting for the service manager");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    runtime.shutdown();
    Ok(())
}

/// The hub keeps a server row for itself so self-targeted commands and
/// fleet listings include it.
async fn ensure_self_row(store: &Store, settings: &Settings) -> AppResult<uuid::Uuid> {
    let mac = omni_site::identity::discover_mac();
    let servers = store.servers();
    if let Some(existing) = servers
        .find_by_mac(&mac)
        .await
        .map_err(|source| AppError::Hub { source })?
    {
        return Ok(existing.id);
    }
    let row = servers
        .create(
            &mac,
            "hub",
            "",
            &format!("http://localhost:{}", settings.api_port),
            &omni_hub::auth::registration_key_digest(&settings.registration_key),
            None,
            Some(app_version()),
        )
        .await
        .map_err(|source| AppError::Hub { source })?;
    servers
        .set_authorized(row.id, true)
        .await
        .map_err(|source| AppError::Hub { source })?;
    info!(server_id = %row.id, "hub self row created");
    Ok(row.id)
}

fn flatten_serve(
    outcome: Result<std::io::Result<()>, tokio::task::JoinError>,
    addr: SocketAddr,
) -> AppResult<()> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(bind_error(addr, source)),
        Err(join_err) => {
            warn!(error = %join_err, "server task aborted");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; ctrl-c only");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
