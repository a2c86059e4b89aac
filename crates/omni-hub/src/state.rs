//! Shared hub state threaded through every handler and loop.

use std::path::PathBuf;
use std::sync::Arc;

use omni_config::Settings;
use omni_data::Store;
use omni_tracker::Tracker;
use tokio::sync::watch;
use uuid::Uuid;

use crate::link::LinkRegistry;

/// Hub-relevant settings extracted from the merged configuration.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Shared registration secret, compared verbatim on first contact.
    pub registration_key: String,
    /// Tracker port advertised in rewritten announce URLs.
    pub tracker_port: u16,
    /// Directory served under `/releases`.
    pub releases_dir: PathBuf,
    /// Version string reported by `/health`.
    pub version: String,
}

impl HubSettings {
    /// Extract hub settings from the merged configuration.
    #[must_use]
    pub fn from_settings(settings: &Settings, version: &str) -> Self {
        Self {
            registration_key: settings.registration_key.clone(),
            tracker_port: settings.tracker_port,
            releases_dir: settings.state_dir.join("releases"),
            version: version.to_string(),
        }
    }
}

/// The hub's shared dependencies.
pub struct HubState {
    /// Authoritative persistence.
    pub store: Store,
    /// In-memory tracker.
    pub tracker: Arc<Tracker>,
    /// Live push-link registry.
    pub links: Arc<LinkRegistry>,
    /// Hub settings.
    pub settings: HubSettings,
    /// The hub's own server row, for self-targeted commands.
    pub self_server_id: watch::Receiver<Option<Uuid>>,
    /// Restart signal: flipping to `true` asks the binary to exit so the
    /// service manager respawns it.
    pub restart: watch::Sender<bool>,
}

/// Shared handle passed to axum.
pub type SharedState = Arc<HubState>;

impl HubState {
    /// Assemble the hub state value.
    #[must_use]
    pub fn new(
        store: Store,
        tracker: Arc<Tracker>,
        links: Arc<LinkRegistry>,
        settings: HubSettings,
        self_server_id: watch::Receiver<Option<Uuid>>,
        restart: watch::Sender<bool>,
    ) -> SharedState {
        Arc::new(Self {
            store,
            tracker,
            links,
            settings,
            self_server_id,
            restart,
        })
    }

    /// Whether a command target is the hub's own row.
    #[must_use]
    pub fn is_self(&self, server_id: Uuid) -> bool {
        *self.self_server_id.borrow() == Some(server_id)
    }
}
