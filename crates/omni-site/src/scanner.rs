//! The library scanner: discovers DCPs under the configured roots and
//! reports inventory to the hub.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use omni_dcp::{DcpParser, PackageMetadata, find_dcp_dirs};
use omni_proto::{
    AssetDescriptor, CompositionDescriptor, InventoryItem, InventoryReport, InventoryStatus,
    PackageDescriptor,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::HubClient;
use crate::error::{SiteError, SiteResult};

/// Scan lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// No scan has run yet.
    Idle,
    /// A scan is in progress.
    Running,
    /// The last scan completed cleanly.
    Success,
    /// The last scan completed with per-package errors.
    Partial,
    /// The last scan failed outright.
    Failed,
    /// The scanner itself hit an infrastructure error.
    Error,
}

/// Status surfaced by `get_scan_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    /// Lifecycle state.
    pub status: ScanState,
    /// Start of the last (or current) scan.
    pub started_at: Option<DateTime<Utc>>,
    /// End of the last scan.
    pub completed_at: Option<DateTime<Utc>>,
    /// DCP directories seen.
    pub packages_found: usize,
    /// Packages unseen before this scan.
    pub packages_added: usize,
    /// Packages whose path changed.
    pub packages_updated: usize,
    /// Packages that vanished since the previous scan.
    pub packages_removed: usize,
    /// Per-path parse errors.
    pub errors: Vec<String>,
}

impl Default for ScanStatus {
    fn default() -> Self {
        Self {
            status: ScanState::Idle,
            started_at: None,
            completed_at: None,
            packages_found: 0,
            packages_added: 0,
            packages_updated: 0,
            packages_removed: 0,
            errors: Vec::new(),
        }
    }
}

/// Previous-scan snapshot persisted so removals survive restarts.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct InventorySnapshot {
    /// `assetmap_uuid → local path` of the last successful scan.
    packages: HashMap<Uuid, PathBuf>,
}

const SNAPSHOT_FILE: &str = "inventory-snapshot.json";

/// One discovered package, kept for the generation worker.
#[derive(Debug, Clone)]
pub struct LocalPackage {
    /// Parsed metadata.
    pub metadata: PackageMetadata,
    /// Package root on this site.
    pub path: PathBuf,
}

/// The site's library scanner. Cooperative: one scan at a time, repeat
/// triggers during a run return immediately.
pub struct Scanner {
    roots: Vec<PathBuf>,
    state_dir: PathBuf,
    parser: Arc<dyn DcpParser>,
    status: Mutex<ScanStatus>,
    running: tokio::sync::Semaphore,
    packages: Mutex<HashMap<Uuid, LocalPackage>>,
}

impl Scanner {
    /// Create a scanner over the configured library roots.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, state_dir: PathBuf, parser: Arc<dyn DcpParser>) -> Self {
        Self {
            roots,
            state_dir,
            parser,
            status: Mutex::new(ScanStatus::default()),
            running: tokio::sync::Semaphore::new(1),
            packages: Mutex::new(HashMap::new()),
        }
    }

    /// Current scan status.
    pub async fn status(&self) -> ScanStatus {
        self.status.lock().await.clone()
    }

    /// Packages found by the most recent scan.
    pub async fn local_packages(&self) -> Vec<LocalPackage> {
        self.packages.lock().await.values().cloned().collect()
    }

    /// Look one package up by its ASSETMAP UUID.
    pub async fn local_package(&self, assetmap_uuid: Uuid) -> Option<LocalPackage> {
        self.packages.lock().await.get(&assetmap_uuid).cloned()
    }

    /// Run a scan unless one is already in progress (in which case this
    /// returns immediately without scanning).
    ///
    /// # Errors
    ///
    /// Returns an error when the hub rejects the inventory upload.
    pub async fn trigger_scan(&self, client: &HubClient) -> SiteResult<()> {
        let Ok(_permit) = self.running.try_acquire() else {
            info!("scan already running; trigger ignored");
            return Ok(());
        };

        {
            let mut status = self.status.lock().await;
            status.status = ScanState::Running;
            status.started_at = Some(Utc::now());
            status.completed_at = None;
            status.errors.clear();
        }

        let result = self.run_scan(client).await;

        let mut status = self.status.lock().await;
        status.completed_at = Some(Utc::now());
        match &result {
            Ok(outcome) => {
                status.packages_found = outcome.found;
                status.packages_added = outcome.added;
                status.packages_updated = outcome.updated;
                status.packages_removed = outcome.removed;
                status.errors.clone_from(&outcome.errors);
                status.status = if outcome.errors.is_empty() {
                    ScanState::Success
                } else {
                    ScanState::Partial
                };
                info!(
                    found = outcome.found,
                    added = outcome.added,
                    removed = outcome.removed,
                    errors = outcome.errors.len(),
                    "library scan finished"
                );
            }
            Err(err) => {
                status.status = ScanState::Error;
                status.errors.push(err.to_string());
                warn!(error = %err, "library scan failed");
            }
        }
        result.map(|_| ())
    }

    async fn run_scan(&self, client: &HubClient) -> SiteResult<ScanOutcome> {
        let previous = self.load_snapshot()?;
        let mut outcome = ScanOutcome::default();
        let mut found: HashMap<Uuid, LocalPackage> = HashMap::new();

        for root in &self.roots {
            if !root.exists() {
                outcome
                    .errors
                    .push(format!("library root missing: {}", root.display()));
                continue;
            }
            for dir in find_dcp_dirs(root) {
                let parser = Arc::clone(&self.parser);
                let dir_for_parse = dir.clone();
                let parsed = tokio::task::spawn_blocking(move || parser.parse(&dir_for_parse))
                    .await
                    .map_err(|err| SiteError::State {
                        detail: format!("scan worker panicked: {err}"),
                    })?;
                match parsed {
                    Ok(metadata) => {
                        outcome.found += 1;
                        let assetmap = metadata.assetmap_uuid;
                        match previous.packages.get(&assetmap) {
                            None => outcome.added += 1,
                            Some(old_path) if old_path != &dir => outcome.updated += 1,
                            Some(_) => {}
                        }
                        found.insert(assetmap, LocalPackage { metadata, path: dir });
                    }
                    Err(err) => {
                        // Parse errors never abort the scan.
                        outcome.errors.push(format!("{}: {err}", dir.display()));
                    }
                }
            }
        }

        outcome.removed = previous
            .packages
            .keys()
            .filter(|uuid| !found.contains_key(uuid))
            .count();

        let report = build_report(&previous, &found);
        client.post_inventory(&report).await?;

        self.save_snapshot(&found)?;
        *self.packages.lock().await = found;
        Ok(outcome)
    }

    fn load_snapshot(&self) -> SiteResult<InventorySnapshot> {
        let path = self.state_dir.join(SNAPSHOT_FILE);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InventorySnapshot::default());
            }
            Err(source) => return Err(SiteError::Io { path, source }),
        };
        serde_json::from_slice(&contents).map_err(|err| SiteError::State {
            detail: format!("decode {}: {err}", path.display()),
        })
    }

    fn save_snapshot(&self, found: &HashMap<Uuid, LocalPackage>) -> SiteResult<()> {
        std::fs::create_dir_all(&self.state_dir).map_err(|source| SiteError::Io {
            path: self.state_dir.clone(),
            source,
        })?;
        let snapshot = InventorySnapshot {
            packages: found
                .iter()
                .map(|(uuid, package)| (*uuid, package.path.clone()))
                .collect(),
        };
        let path = self.state_dir.join(SNAPSHOT_FILE);
        let payload = serde_json::to_vec_pretty(&snapshot).map_err(|err| SiteError::State {
            detail: format!("encode snapshot: {err}"),
        })?;
        std::fs::write(&path, payload).map_err(|source| SiteError::Io { path, source })
    }
}

#[derive(Debug, Default)]
struct ScanOutcome {
    found: usize,
    added: usize,
    updated: usize,
    removed: usize,
    errors: Vec<String>,
}

/// Assemble the inventory report: online rows for everything found,
/// offline rows for packages that vanished since the previous scan.
fn build_report(
    previous: &InventorySnapshot,
    found: &HashMap<Uuid, LocalPackage>,
) -> InventoryReport {
    let mut items: Vec<InventoryItem> = found
        .values()
        .map(|package| InventoryItem {
            assetmap_uuid: package.metadata.assetmap_uuid,
            local_path: package.path.display().to_string(),
            status: InventoryStatus::Online,
        })
        .collect();
    for (uuid, path) in &previous.packages {
        if !found.contains_key(uuid) {
            items.push(InventoryItem {
                assetmap_uuid: *uuid,
                local_path: path.display().to_string(),
                status: InventoryStatus::Offline,
            });
        }
    }
    items.sort_by_key(|item| item.assetmap_uuid);

    let packages = found.values().map(|p| describe(&p.metadata)).collect();
    InventoryReport { items, packages }
}

fn describe(metadata: &PackageMetadata) -> PackageDescriptor {
    PackageDescriptor {
        assetmap_uuid: metadata.assetmap_uuid,
        package_name: metadata.package_name.clone(),
        content_title: metadata.content_title.clone(),
        content_kind: metadata.content_kind.clone(),
        total_size_bytes: metadata.total_size_bytes,
        file_count: metadata.file_count,
        compositions: metadata
            .compositions
            .iter()
            .map(|c| CompositionDescriptor {
                cpl_uuid: c.cpl_uuid,
                edit_rate: c.edit_rate.clone(),
                resolution: c.resolution.clone(),
                sound_config: c.sound_config.clone(),
                reel_count: c.reel_count,
                duration_frames: c.duration_frames,
            })
            .collect(),
        assets: metadata
            .assets
            .iter()
            .map(|a| AssetDescriptor {
                asset_uuid: a.asset_uuid,
                file_path: a.file_path.display().to_string(),
                file_name: a.file_name.clone(),
                asset_type: a.asset_type.clone(),
                size_bytes: a.size_bytes,
                hash_algorithm: a.hash_algorithm.clone(),
                hash_value: a.hash_value.clone(),
            })
            .collect(),
    }
}

/// Spawn the periodic rescan loop: a short startup grace, then one scan
/// every `interval_hours`.
pub fn spawn_periodic(
    scanner: Arc<Scanner>,
    client: HubClient,
    interval_hours: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // Grace period lets registration and the engine settle first.
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        let period = std::time::Duration::from_secs(interval_hours.max(1) * 3600);
        loop {
            if let Err(err) = scanner.trigger_scan(&client).await {
                warn!(error = %err, "periodic scan failed");
            }
            tokio::time::sleep(period).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_dcp::ScrapeParser;

    fn make_dcp(root: &Path, name: &str, uuid: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).expect("dir");
        std::fs::write(
            dir.join("ASSETMAP.xml"),
            format!("<AssetMap><Id>urn:uuid:{uuid}</Id></AssetMap>"),
        )
        .expect("assetmap");
        std::fs::write(
            dir.join("CPL_x.xml"),
            format!(
                "<Cpl><Id>urn:uuid:99999999-0000-0000-0000-{}</Id></Cpl>",
                &uuid[24..]
            ),
        )
        .expect("cpl");
        std::fs::write(dir.join("PKL_x.xml"), "<Pkl/>").expect("pkl");
        std::fs::write(dir.join("picture.mxf"), vec![1_u8; 64]).expect("mxf");
        dir
    }

    #[test]
    fn report_includes_offline_rows_for_vanished_packages() {
        let gone = Uuid::new_v4();
        let mut previous = InventorySnapshot::default();
        previous
            .packages
            .insert(gone, PathBuf::from("/library/OLD_FTR"));

        let report = build_report(&previous, &HashMap::new());
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].status, InventoryStatus::Offline);
        assert_eq!(report.items[0].assetmap_uuid, gone);
    }

    #[tokio::test]
    async fn snapshot_round_trips_and_tracks_additions() {
        let library = tempfile::tempdir().expect("tempdir");
        let state = tempfile::tempdir().expect("tempdir");
        make_dcp(
            library.path(),
            "MOVIE_FTR",
            "11111111-2222-3333-4444-555555555555",
        );

        let scanner = Scanner::new(
            vec![library.path().to_path_buf()],
            state.path().to_path_buf(),
            Arc::new(ScrapeParser),
        );

        // Drive the filesystem half of the scan without a hub.
        let previous = scanner.load_snapshot().expect("snapshot");
        assert!(previous.packages.is_empty());

        let dirs = find_dcp_dirs(library.path());
        assert_eq!(dirs.len(), 1);
        let metadata = ScrapeParser.parse(&dirs[0]).expect("parse");
        let mut found = HashMap::new();
        found.insert(
            metadata.assetmap_uuid,
            LocalPackage {
                metadata,
                path: dirs[0].clone(),
            },
        );
        scanner.save_snapshot(&found).expect("save");

        let reloaded = scanner.load_snapshot().expect("snapshot");
        assert_eq!(reloaded.packages.len(), 1);
    }
}
