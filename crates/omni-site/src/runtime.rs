//! Site runtime assembly: registration, authorization wait, and the
//! long-lived loops.

use std::sync::Arc;
use std::time::Duration;

use omni_config::Settings;
use omni_dcp::DcpParser;
use omni_proto::{HeartbeatRequest, RegistrationRequest};
use omni_torrent::{BuildOptions, PieceEngine};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::HubClient;
use crate::commands::Executor;
use crate::error::{SiteError, SiteResult};
use crate::generator::{Generator, QueueState};
use crate::identity::{StoredIdentity, discover_mac, load_identity, save_identity};
use crate::link::spawn_link_client;
use crate::reporter::spawn_reporter;
use crate::scanner::{Scanner, spawn_periodic};

/// Poll cadence for the command fallback endpoints.
const COMMAND_POLL_PERIOD: Duration = Duration::from_secs(15);
/// Heartbeat cadence.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);
/// Retry cadence while waiting for registration or authorization.
const REGISTRATION_RETRY: Duration = Duration::from_secs(20);

/// The assembled site runtime.
pub struct SiteRuntime {
    tasks: Vec<JoinHandle<()>>,
    /// Flips to `true` when a restart command asks the process to exit.
    pub restart: watch::Receiver<bool>,
}

impl SiteRuntime {
    /// Register with the hub, wait for admin authorization, and start
    /// every site loop.
    ///
    /// # Errors
    ///
    /// Returns an error when local state cannot be prepared; hub
    /// unavailability is retried, not surfaced.
    pub async fn start(
        settings: &Settings,
        engine: Arc<dyn PieceEngine>,
        parser: Arc<dyn DcpParser>,
        version: &str,
        shutdown: watch::Receiver<bool>,
    ) -> SiteResult<Self> {
        let hub_url = settings
            .site
            .main_server_url
            .clone()
            .ok_or(SiteError::NotReady {
                reason: "main_server_url_missing",
            })?;
        let mac = load_identity(&settings.state_dir)?
            .map_or_else(discover_mac, |identity| identity.mac);

        let mut client = HubClient::new(&hub_url, &mac)?;
        let server_id = register_until_accepted(&client, settings, &mac, version).await;
        client.set_server_id(server_id);
        save_identity(
            &settings.state_dir,
            &StoredIdentity { server_id, mac: mac.clone() },
        )?;
        wait_for_authorization(&client).await;
        info!(server_id = %server_id, "site authorized; starting runtime loops");

        let scanner = Arc::new(Scanner::new(
            settings.site.library_dirs.clone(),
            settings.state_dir.clone(),
            parser,
        ));
        let queue_state = Arc::new(QueueState::default());
        let (restart_tx, restart_rx) = watch::channel(false);

        let build_options = BuildOptions {
            piece_hash_workers: settings.effective_piece_hash_workers(),
            ..BuildOptions::default()
        };
        let generator = Arc::new(Generator::new(
            client.clone(),
            Arc::clone(&engine),
            Arc::clone(&scanner),
            Arc::clone(&queue_state),
            &settings.state_dir,
            build_options,
            settings.torrent_data_dir.clone(),
            settings.max_torrent_generation_workers as usize,
            shutdown.clone(),
        )?);
        let executor = Arc::new(Executor::new(
            client.clone(),
            Arc::clone(&engine),
            Arc::clone(&scanner),
            settings.torrent_data_dir.clone(),
            restart_tx,
        ));

        let hub_host = host_of(&hub_url);
        let mut tasks = vec![
            spawn_periodic(
                Arc::clone(&scanner),
                client.clone(),
                settings.site.scan_interval_hours,
            ),
            Arc::clone(&generator).spawn(),
            spawn_reporter(
                client.clone(),
                Arc::clone(&engine),
                Arc::clone(&queue_state),
                shutdown.clone(),
            ),
            spawn_link_client(
                hub_host,
                settings.link_port,
                server_id,
                mac,
                Arc::clone(&executor),
                shutdown.clone(),
            ),
            spawn_command_poller(client.clone(), Arc::clone(&executor), shutdown.clone()),
            spawn_heartbeat(client.clone(), version.to_string(), shutdown.clone()),
        ];

        // Startup grace scan so the hub learns this site's inventory soon
        // after boot, before the first periodic pass.
        let startup_scanner = Arc::clone(&scanner);
        let startup_client = client.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if let Err(err) = startup_scanner.trigger_scan(&startup_client).await {
                warn!(error = %err, "startup scan failed");
            }
        }));

        Ok(Self {
            tasks,
            restart: restart_rx,
        })
    }

    /// Abort every loop (shutdown path).
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn register_until_accepted(
    client: &HubClient,
    settings: &Settings,
    mac: &str,
    version: &str,
) -> uuid::Uuid {
    let request = RegistrationRequest {
        name: settings.site.server_name.clone(),
        location: settings.site.location.clone(),
        api_url: format!("http://{}:{}", settings.site.server_name, settings.api_port),
        mac: mac.to_string(),
        registration_key: settings.registration_key.clone(),
        storage_capacity: None,
        software_version: version.to_string(),
    };
    loop {
        match client.register(&request).await {
            Ok(response) => {
                info!(
                    server_id = %response.server_id,
                    authorized = response.is_authorized,
                    "registered with hub"
                );
                return response.server_id;
            }
            Err(err) if err.is_unauthorized() => {
                // A key mismatch will not fix itself quickly, but the
                // operator may rotate the key; keep retrying slowly.
                warn!(error = %err, "registration refused; check registration_key");
            }
            Err(err) => {
                warn!(error = %err, "registration failed; hub unreachable?");
            }
        }
        tokio::time::sleep(REGISTRATION_RETRY).await;
    }
}

async fn wait_for_authorization(client: &HubClient) {
    loop {
        match client.auth_status().await {
            Ok(true) => return,
            Ok(false) => {
                info!("awaiting admin authorization");
            }
            Err(err) => {
                warn!(error = %err, "authorization check failed");
            }
        }
        tokio::time::sleep(REGISTRATION_RETRY).await;
    }
}

fn spawn_command_poller(
    client: HubClient,
    executor: Arc<Executor>,
    cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(COMMAND_POLL_PERIOD);
        loop {
            tick.tick().await;
            if *cancel.borrow() {
                break;
            }
            poll_once(&client, &executor).await;
        }
    })
}

async fn poll_once(client: &HubClient, executor: &Arc<Executor>) {
    match client.pending_transfers().await {
        Ok(pending) => {
            for transfer in pending {
                if let Err(err) = executor.handle_pending_transfer(transfer).await {
                    warn!(error = %err, "pending transfer pickup failed");
                }
            }
        }
        Err(err) => warn!(error = %err, "pending transfer poll failed"),
    }

    match client.transfer_commands().await {
        Ok(commands) => {
            for command in commands {
                if let Err(err) = executor.handle_transfer_command(command).await {
                    warn!(error = %err, "polled transfer command failed to ack");
                }
            }
        }
        Err(err) => warn!(error = %err, "transfer command poll failed"),
    }

    match client.content_commands().await {
        Ok(commands) => {
            for command in commands {
                if let Err(err) = executor.handle_content_command(command).await {
                    warn!(error = %err, "polled content command failed to ack");
                }
            }
        }
        Err(err) => warn!(error = %err, "content command poll failed"),
    }

    match client.pending_action().await {
        Ok(Some(action)) => {
            if let Err(err) = executor.handle_action(action).await {
                warn!(error = %err, "polled action failed to report");
            }
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "action poll failed"),
    }
}

fn spawn_heartbeat(
    client: HubClient,
    version: String,
    cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEARTBEAT_PERIOD);
        loop {
            tick.tick().await;
            if *cancel.borrow() {
                break;
            }
            let body = HeartbeatRequest {
                storage_capacity: None,
                software_version: Some(version.clone()),
                package_count: None,
            };
            if let Err(err) = client.heartbeat(&body).await {
                warn!(error = %err, "heartbeat failed");
            }
        }
    })
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("http://")
        .trim_start_matches("https://")
        .split(['/', ':'])
        .next()
        .unwrap_or("localhost")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_handles_ports_and_paths() {
        assert_eq!(host_of("http://hub.example:9080"), "hub.example");
        assert_eq!(host_of("https://hub.example/api"), "hub.example");
        assert_eq!(host_of("http://10.1.2.3:9080/x"), "10.1.2.3");
    }
}
