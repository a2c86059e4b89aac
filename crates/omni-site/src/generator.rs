//! The torrent-generation worker: asks the hub what to do per local
//! package, claims generations, builds canonical torrents, and keeps the
//! queue figures the reporter ships.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use omni_proto::{
    CanonicalFile, HashAction, HashCheckRequest, QueueStatusItem, RegisterTorrentRequest,
};
use omni_torrent::{
    BuildOptions, BuildProgress, FileCheckpointStore, InfoHash, PieceEngine,
    build_package_torrent, enumerate_files,
};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::HubClient;
use crate::error::{SiteError, SiteResult};
use crate::scanner::{LocalPackage, Scanner};

/// How often the worker re-evaluates local packages.
const SYNC_PERIOD: std::time::Duration = std::time::Duration::from_secs(60);

/// Queue figures shared with the status reporter.
#[derive(Default)]
pub struct QueueState {
    items: Mutex<HashMap<Uuid, QueueStatusItem>>,
}

impl QueueState {
    /// Replace the item for a package.
    pub async fn set(&self, item: QueueStatusItem) {
        self.items.lock().await.insert(item.assetmap_uuid, item);
    }

    /// Snapshot for the next report.
    pub async fn snapshot(&self) -> Vec<QueueStatusItem> {
        let mut items: Vec<QueueStatusItem> = self.items.lock().await.values().cloned().collect();
        items.sort_by_key(|item| item.assetmap_uuid);
        items
    }
}

/// The generation worker.
pub struct Generator {
    client: HubClient,
    engine: Arc<dyn PieceEngine>,
    scanner: Arc<Scanner>,
    queue_state: Arc<QueueState>,
    checkpoints: FileCheckpointStore,
    build_options: BuildOptions,
    data_dir: PathBuf,
    slots: Arc<Semaphore>,
    cancel: watch::Receiver<bool>,
    settled: Mutex<HashSet<Uuid>>,
}

impl Generator {
    /// Assemble the worker.
    ///
    /// # Errors
    ///
    /// Returns an error when the checkpoint directory cannot be created.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: HubClient,
        engine: Arc<dyn PieceEngine>,
        scanner: Arc<Scanner>,
        queue_state: Arc<QueueState>,
        state_dir: &Path,
        build_options: BuildOptions,
        data_dir: PathBuf,
        max_concurrent: usize,
        cancel: watch::Receiver<bool>,
    ) -> SiteResult<Self> {
        let checkpoints = FileCheckpointStore::new(state_dir.join("checkpoints"))?;
        Ok(Self {
            client,
            engine,
            scanner,
            queue_state,
            checkpoints,
            build_options,
            data_dir,
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel,
            settled: Mutex::new(HashSet::new()),
        })
    }

    /// Spawn the periodic sync loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SYNC_PERIOD);
            loop {
                tick.tick().await;
                if *self.cancel.borrow() {
                    break;
                }
                if let Err(err) = self.sync_packages().await {
                    warn!(error = %err, "generation sync pass failed");
                }
            }
        })
    }

    /// One pass over the local packages: hash, wait, or download each.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures; per-package
    /// problems are logged and retried next pass.
    pub async fn sync_packages(self: &Arc<Self>) -> SiteResult<()> {
        let packages = self.scanner.local_packages().await;
        for package in packages {
            let assetmap = package.metadata.assetmap_uuid;
            if self.settled.lock().await.contains(&assetmap) {
                continue;
            }
            let decision = match self
                .client
                .hash_check(&HashCheckRequest {
                    assetmap_uuid: assetmap,
                })
                .await
            {
                Ok(decision) => decision,
                Err(err) => {
                    debug!(assetmap = %assetmap, error = %err, "hash check failed; will retry");
                    continue;
                }
            };

            match decision.action {
                HashAction::Download => {
                    let Some(info_hash) = decision.info_hash else {
                        warn!(assetmap = %assetmap, "download decision without info hash");
                        continue;
                    };
                    if let Err(err) = self.ensure_seedable(&package, &info_hash).await {
                        warn!(assetmap = %assetmap, error = %err, "failed to join swarm");
                    } else {
                        self.settled.lock().await.insert(assetmap);
                    }
                }
                HashAction::Wait => {
                    debug!(
                        assetmap = %assetmap,
                        server = decision.hashing_server.as_deref().unwrap_or("unknown"),
                        "another server is generating; waiting"
                    );
                }
                HashAction::Hash => {
                    self.try_start_generation(package, decision.package_id).await;
                }
            }
        }
        Ok(())
    }

    async fn try_start_generation(self: &Arc<Self>, package: LocalPackage, package_id: Uuid) {
        let assetmap = package.metadata.assetmap_uuid;
        match self.client.claim_generation(package_id).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                debug!(assetmap = %assetmap, "lost the generation claim race");
                return;
            }
            Err(err) => {
                warn!(assetmap = %assetmap, error = %err, "claim request failed");
                return;
            }
        }

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = worker.slots.clone().acquire_owned().await else {
                return;
            };
            worker.run_generation(package).await;
        });
    }

    async fn run_generation(self: &Arc<Self>, package: LocalPackage) {
        let assetmap = package.metadata.assetmap_uuid;
        let key = assetmap.to_string();
        info!(assetmap = %assetmap, path = %package.path.display(), "generation started");

        let (progress_tx, progress_rx) = watch::channel(BuildProgress::default());
        let forward = self.spawn_progress_forwarder(assetmap, package.metadata.total_size_bytes, progress_rx);

        let store: &dyn omni_torrent::CheckpointStore = &self.checkpoints;
        let built = build_package_torrent(
            &package.path,
            &self.build_options,
            Some((store, key.as_str())),
            &self.cancel,
            Some(&progress_tx),
        )
        .await;
        forward.abort();

        match built {
            Ok(built) => {
                if let Err(err) = self.publish(&package, &built).await {
                    warn!(assetmap = %assetmap, error = %err, "torrent publication failed");
                    self.queue_state
                        .set(queue_item(assetmap, "failed", 0.0, Some(err.to_string())))
                        .await;
                    return;
                }
                self.queue_state
                    .set(queue_item(assetmap, "completed", 100.0, None))
                    .await;
                self.settled.lock().await.insert(assetmap);
                info!(assetmap = %assetmap, info_hash = %built.info_hash, "generation complete");
            }
            Err(omni_torrent::TorrentError::Cancelled) => {
                info!(assetmap = %assetmap, "generation cancelled; checkpoint kept");
                self.queue_state
                    .set(queue_item(assetmap, "cancelled", 0.0, None))
                    .await;
            }
            Err(err) => {
                warn!(assetmap = %assetmap, error = %err, "generation failed");
                self.queue_state
                    .set(queue_item(assetmap, "failed", 0.0, Some(err.to_string())))
                    .await;
            }
        }
    }

    fn spawn_progress_forwarder(
        self: &Arc<Self>,
        assetmap: Uuid,
        total_size: u64,
        mut progress: watch::Receiver<BuildProgress>,
    ) -> JoinHandle<()> {
        let queue_state = Arc::clone(&self.queue_state);
        tokio::spawn(async move {
            let mut last_bytes = 0_u64;
            let mut last_at = Utc::now();
            while progress.changed().await.is_ok() {
                let snapshot = progress.borrow().clone();
                let now = Utc::now();
                let elapsed = (now - last_at).num_milliseconds().max(1) as u64;
                let speed = snapshot.bytes_hashed.saturating_sub(last_bytes) * 1000 / elapsed;
                last_bytes = snapshot.bytes_hashed;
                last_at = now;
                queue_state
                    .set(QueueStatusItem {
                        assetmap_uuid: assetmap,
                        status: "generating".to_string(),
                        progress_percent: snapshot.percent(),
                        current_file: Some(snapshot.current_file.clone()),
                        total_size,
                        hashing_speed_bps: Some(speed),
                        error_message: None,
                    })
                    .await;
            }
        })
    }

    /// Register the built torrent with the hub and start seeding locally.
    async fn publish(
        &self,
        package: &LocalPackage,
        built: &omni_torrent::BuiltTorrent,
    ) -> SiteResult<()> {
        let canonical_files = collect_canonical_files(&package.path)?;
        let request = RegisterTorrentRequest {
            assetmap_uuid: package.metadata.assetmap_uuid,
            info_hash: built.info_hash.to_hex(),
            torrent_bytes: built.torrent_bytes.clone(),
            piece_size: built.piece_size,
            total_pieces: built.total_pieces,
            file_count: built.file_count,
            total_size: built.total_size,
            canonical_files,
        };
        self.client.register_torrent(&request).await?;

        let data_dir = package
            .path
            .parent()
            .map_or_else(|| self.data_dir.clone(), Path::to_path_buf);
        let hash = self.engine.load(&built.torrent_bytes, &data_dir).await?;
        self.engine.start(&hash).await?;
        Ok(())
    }

    /// Join an existing swarm for a package this site already holds: load
    /// the canonical torrent and, when the local XML bytes diverge from
    /// the canonical identity, adopt the canonical non-MXF files first.
    pub async fn ensure_seedable(&self, package: &LocalPackage, info_hash: &str) -> SiteResult<()> {
        let blob = self.client.fetch_torrent_file(info_hash).await?;
        let data_dir = package
            .path
            .parent()
            .map_or_else(|| self.data_dir.clone(), Path::to_path_buf);
        let hash = self.engine.load(&blob, &data_dir).await?;

        if !self.holds_complete(&hash).await {
            let Some(cpl) = package.metadata.compositions.first() else {
                return Err(SiteError::NotReady {
                    reason: "package_has_no_cpl_for_canonical_exchange",
                });
            };
            let canonical = self.client.canonical_xml(cpl.cpl_uuid).await?;
            adopt_canonical_files(&package.path, &canonical.files)?;
            info!(
                assetmap = %package.metadata.assetmap_uuid,
                files = canonical.files.len(),
                "adopted canonical non-MXF files"
            );
            // Reload so the engine re-verifies against the new bytes.
            self.engine.load(&blob, &data_dir).await?;
        }

        self.engine.start(&hash).await?;
        Ok(())
    }

    async fn holds_complete(&self, info_hash: &InfoHash) -> bool {
        let stats = self.engine.stats().await;
        stats
            .iter()
            .any(|item| item.info_hash == info_hash.to_hex() && item.progress_percent >= 100.0)
    }
}

fn queue_item(
    assetmap: Uuid,
    status: &str,
    progress: f64,
    error_message: Option<String>,
) -> QueueStatusItem {
    QueueStatusItem {
        assetmap_uuid: assetmap,
        status: status.to_string(),
        progress_percent: progress,
        current_file: None,
        total_size: 0,
        hashing_speed_bps: None,
        error_message,
    }
}

/// Read the non-MXF files of a package for the canonical exchange.
fn collect_canonical_files(root: &Path) -> SiteResult<Vec<CanonicalFile>> {
    let mut files = Vec::new();
    for file in enumerate_files(root)? {
        if file.relative.to_ascii_lowercase().ends_with(".mxf") {
            continue;
        }
        let mut path = root.to_path_buf();
        for component in file.relative.split('/') {
            path.push(component);
        }
        let bytes = std::fs::read(&path).map_err(|source| SiteError::Io { path, source })?;
        files.push(CanonicalFile {
            relative_path: file.relative,
            bytes,
        });
    }
    Ok(files)
}

/// Overwrite the listed canonical files on disk. MXF payloads are never
/// touched regardless of what the response lists.
fn adopt_canonical_files(root: &Path, files: &[CanonicalFile]) -> SiteResult<()> {
    for file in files {
        if file.relative_path.to_ascii_lowercase().ends_with(".mxf") {
            warn!(path = %file.relative_path, "refusing to overwrite an MXF from canonical exchange");
            continue;
        }
        if file.relative_path.split('/').any(|c| c == "..") {
            warn!(path = %file.relative_path, "refusing canonical path traversal");
            continue;
        }
        let mut path = root.to_path_buf();
        for component in file.relative_path.split('/') {
            path.push(component);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SiteError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, &file.bytes).map_err(|source| SiteError::Io { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_adoption_overwrites_xml_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        std::fs::write(root.join("CPL_a.xml"), b"old").expect("seed");
        std::fs::write(root.join("picture.mxf"), b"payload").expect("seed");

        let files = vec![
            CanonicalFile {
                relative_path: "CPL_a.xml".to_string(),
                bytes: b"canonical".to_vec(),
            },
            CanonicalFile {
                relative_path: "picture.mxf".to_string(),
                bytes: b"evil".to_vec(),
            },
            CanonicalFile {
                relative_path: "../escape.xml".to_string(),
                bytes: b"evil".to_vec(),
            },
        ];
        adopt_canonical_files(root, &files).expect("adopt");

        assert_eq!(std::fs::read(root.join("CPL_a.xml")).unwrap(), b"canonical");
        assert_eq!(std::fs::read(root.join("picture.mxf")).unwrap(), b"payload");
        assert!(!tmp.path().parent().unwrap().join("escape.xml").exists());
    }

    #[test]
    fn canonical_collection_skips_mxf() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("ASSETMAP.xml"), b"<AssetMap/>").expect("seed");
        std::fs::write(tmp.path().join("picture.mxf"), b"payload").expect("seed");

        let files = collect_canonical_files(tmp.path()).expect("collect");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "ASSETMAP.xml");
    }
}
