//! The canonical package builder.
//!
//! Turns a package directory into a deterministic info-hash and `.torrent`
//! blob: transfer droppings and hidden files are discarded, the remaining
//! files are sorted by byte-lexicographic relative path, and SHA-1 piece
//! digests are computed over the concatenation of the sorted files. Piece
//! hashing runs on a bounded blocking-worker pool; progress checkpoints are
//! persisted at piece boundaries so an interrupted run resumes without
//! rehashing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::bencode::Bencode;
use crate::checkpoint::{BuildCheckpoint, CheckpointStore};
use crate::error::{TorrentError, TorrentResult};
use crate::info_hash::InfoHash;
use crate::torrent_file;

/// Piece size for packages under the large-package threshold.
pub const SMALL_PIECE_SIZE: u64 = 16 * 1024 * 1024;
/// Piece size for packages at or above the threshold.
pub const LARGE_PIECE_SIZE: u64 = 32 * 1024 * 1024;
/// Total-size threshold separating the two piece sizes (100 GiB).
pub const LARGE_PACKAGE_THRESHOLD: u64 = 100 * 1024 * 1024 * 1024;

/// Default interval between checkpoint writes.
const DEFAULT_CHECKPOINT_INTERVAL: u64 = 256 * 1024 * 1024;

/// Pick the piece size for a package of the given total size.
#[must_use]
pub const fn select_piece_size(total_size: u64) -> u64 {
    if total_size < LARGE_PACKAGE_THRESHOLD {
        SMALL_PIECE_SIZE
    } else {
        LARGE_PIECE_SIZE
    }
}

/// Knobs for one build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Concurrent piece-hash workers (each holds one piece in memory).
    pub piece_hash_workers: usize,
    /// Bytes hashed between checkpoint writes.
    pub checkpoint_interval_bytes: u64,
    /// Override the policy piece size (tests and ad-hoc tooling).
    pub piece_size: Option<u64>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            piece_hash_workers: 4,
            checkpoint_interval_bytes: DEFAULT_CHECKPOINT_INTERVAL,
            piece_size: None,
        }
    }
}

/// Live progress snapshot published while hashing.
#[derive(Debug, Clone, Default)]
pub struct BuildProgress {
    /// Bytes hashed so far.
    pub bytes_hashed: u64,
    /// Total bytes to hash.
    pub total_bytes: u64,
    /// Pieces hashed so far.
    pub pieces_hashed: u64,
    /// Total piece count.
    pub total_pieces: u64,
    /// Relative path of the file currently being read.
    pub current_file: String,
}

impl BuildProgress {
    /// Completion percentage (0-100).
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes_hashed as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Result of a completed build.
#[derive(Debug, Clone)]
pub struct BuiltTorrent {
    /// Canonical content identity.
    pub info_hash: InfoHash,
    /// Full `.torrent` bytes carrying the internal announce placeholder.
    pub torrent_bytes: Vec<u8>,
    /// Piece size used.
    pub piece_size: u64,
    /// Piece count.
    pub total_pieces: u64,
    /// File count.
    pub file_count: u32,
    /// Total payload size in bytes.
    pub total_size: u64,
}

/// One eligible file within the package, relative path in `/` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Path relative to the package root, forward-slash separated.
    pub relative: String,
    /// File size in bytes.
    pub size: u64,
}

/// Enumerate eligible files beneath the package root, sorted
/// byte-lexicographically by relative path.
///
/// # Errors
///
/// Returns an error if the directory walk fails.
pub fn enumerate_files(root: &Path) -> TorrentResult<Vec<PackageFile>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|err| TorrentError::Io {
            path: err
                .path()
                .map_or_else(|| root.to_path_buf(), Path::to_path_buf),
            source: err.into(),
        })?;
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if !entry.file_type().is_file() || is_junk(name) {
            continue;
        }
        // Hidden ancestors exclude the whole subtree.
        let relative_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path());
        if relative_path
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|err| TorrentError::Io {
                path: entry.path().to_path_buf(),
                source: err.into(),
            })?
            .len();
        let relative = relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(PackageFile { relative, size });
    }
    files.sort_by(|a, b| a.relative.as_bytes().cmp(b.relative.as_bytes()));
    Ok(files)
}

/// Transfer droppings that never contribute to content identity.
fn is_junk(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".partial")
        || lower.ends_with(".aspera-ckpt")
        || lower.ends_with(".tmp")
        || lower.ends_with(".nfo")
}

/// Build the canonical torrent for the package rooted at `root`.
///
/// `checkpoints` enables resume across interruptions; `cancel` flips to
/// `true` to stop the run at the next piece boundary (the checkpoint is
/// saved first); `progress` receives live figures when supplied.
///
/// # Errors
///
/// Returns [`TorrentError::Cancelled`] when interrupted, and IO/worker
/// errors otherwise.
pub async fn build_package_torrent(
    root: &Path,
    options: &BuildOptions,
    checkpoints: Option<(&dyn CheckpointStore, &str)>,
    cancel: &watch::Receiver<bool>,
    progress: Option<&watch::Sender<BuildProgress>>,
) -> TorrentResult<BuiltTorrent> {
    let files = enumerate_files(root)?;
    if files.is_empty() {
        return Err(TorrentError::EmptyPackage {
            path: root.to_path_buf(),
        });
    }

    let total_size: u64 = files.iter().map(|f| f.size).sum();
    let piece_size = options
        .piece_size
        .unwrap_or_else(|| select_piece_size(total_size));
    let total_pieces = total_size.div_ceil(piece_size);
    let workers = options.piece_hash_workers.max(1);

    let mut digests = resume_digests(checkpoints, piece_size);
    let start_piece = (digests.len() / 20) as u64;
    if start_piece > 0 {
        info!(
            root = %root.display(),
            resumed_pieces = start_piece,
            "resuming torrent generation from checkpoint"
        );
    }

    let mut reader = PieceReader::new(root, &files, piece_size);
    reader.seek_to(start_piece * piece_size);

    let mut join_set: JoinSet<(u64, [u8; 20])> = JoinSet::new();
    let mut out_of_order: BTreeMap<u64, [u8; 20]> = BTreeMap::new();
    let mut next_to_append = start_piece;
    let mut last_checkpoint_bytes = start_piece * piece_size;

    for index in start_piece..total_pieces {
        if *cancel.borrow() {
            drain_all(&mut join_set, &mut out_of_order).await?;
            append_ready(&mut out_of_order, &mut next_to_append, &mut digests);
            save_checkpoint(checkpoints, &files, piece_size, total_size, &digests)?;
            return Err(TorrentError::Cancelled);
        }

        let buffer = reader.read_piece().await?;
        join_set.spawn_blocking(move || {
            let digest = Sha1::digest(&buffer);
            (index, digest.into())
        });

        // Bound in-flight pieces to the worker cap.
        while join_set.len() >= workers {
            let (done, digest) = join_result(join_set.join_next().await)?;
            out_of_order.insert(done, digest);
        }
        append_ready(&mut out_of_order, &mut next_to_append, &mut digests);

        publish_progress(
            progress,
            &files,
            piece_size,
            total_size,
            total_pieces,
            next_to_append,
        );

        let bytes_done = bytes_for_pieces(next_to_append, piece_size, total_size);
        if bytes_done.saturating_sub(last_checkpoint_bytes) >= options.checkpoint_interval_bytes {
            save_checkpoint(checkpoints, &files, piece_size, total_size, &digests)?;
            last_checkpoint_bytes = bytes_done;
        }
    }

    drain_all(&mut join_set, &mut out_of_order).await?;
    append_ready(&mut out_of_order, &mut next_to_append, &mut digests);
    debug_assert_eq!(digests.len() as u64, total_pieces * 20);

    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("package")
        .to_string();
    let info = build_info_dict(&name, &files, piece_size, &digests);
    let info_bytes = info.encode();
    let info_hash = InfoHash::from_info_bytes(&info_bytes);
    let torrent_bytes = torrent_file::assemble(info);

    if let Some((store, key)) = checkpoints {
        store.clear(key)?;
    }

    publish_progress(
        progress,
        &files,
        piece_size,
        total_size,
        total_pieces,
        total_pieces,
    );
    debug!(
        root = %root.display(),
        info_hash = %info_hash,
        pieces = total_pieces,
        "torrent generation complete"
    );

    Ok(BuiltTorrent {
        info_hash,
        torrent_bytes,
        piece_size,
        total_pieces,
        file_count: files.len() as u32,
        total_size,
    })
}

fn resume_digests(
    checkpoints: Option<(&dyn CheckpointStore, &str)>,
    piece_size: u64,
) -> Vec<u8> {
    let Some((store, key)) = checkpoints else {
        return Vec::new();
    };
    match store.load(key) {
        Ok(Some(checkpoint)) if checkpoint.piece_size == piece_size => checkpoint.piece_digests,
        Ok(Some(_)) => {
            debug!(key, "checkpoint piece size mismatch; rehashing from the start");
            Vec::new()
        }
        Ok(None) => Vec::new(),
        Err(err) => {
            debug!(key, error = %err, "unreadable checkpoint; rehashing from the start");
            Vec::new()
        }
    }
}

fn save_checkpoint(
    checkpoints: Option<(&dyn CheckpointStore, &str)>,
    files: &[PackageFile],
    piece_size: u64,
    total_size: u64,
    digests: &[u8],
) -> TorrentResult<()> {
    let Some((store, key)) = checkpoints else {
        return Ok(());
    };
    let pieces_hashed = (digests.len() / 20) as u64;
    let bytes_hashed = bytes_for_pieces(pieces_hashed, piece_size, total_size);
    let (last_file, last_offset) = locate(files, bytes_hashed);
    store.save(
        key,
        &BuildCheckpoint {
            bytes_hashed,
            pieces_hashed,
            last_file,
            last_offset,
            piece_size,
            piece_digests: digests.to_vec(),
        },
    )
}

const fn bytes_for_pieces(pieces: u64, piece_size: u64, total_size: u64) -> u64 {
    let bytes = pieces * piece_size;
    if bytes > total_size { total_size } else { bytes }
}

/// Locate the file and intra-file offset at a global byte offset.
fn locate(files: &[PackageFile], global_offset: u64) -> (String, u64) {
    let mut remaining = global_offset;
    for file in files {
        if remaining < file.size {
            return (file.relative.clone(), remaining);
        }
        remaining -= file.size;
    }
    files
        .last()
        .map_or((String::new(), 0), |f| (f.relative.clone(), f.size))
}

fn append_ready(
    out_of_order: &mut BTreeMap<u64, [u8; 20]>,
    next_to_append: &mut u64,
    digests: &mut Vec<u8>,
) {
    while let Some(digest) = out_of_order.remove(&*next_to_append) {
        digests.extend_from_slice(&digest);
        *next_to_append += 1;
    }
}

async fn drain_all(
    join_set: &mut JoinSet<(u64, [u8; 20])>,
    out_of_order: &mut BTreeMap<u64, [u8; 20]>,
) -> TorrentResult<()> {
    while let Some(result) = join_set.join_next().await {
        let (index, digest) = join_result(Some(result))?;
        out_of_order.insert(index, digest);
    }
    Ok(())
}

fn join_result(
    result: Option<Result<(u64, [u8; 20]), tokio::task::JoinError>>,
) -> TorrentResult<(u64, [u8; 20])> {
    match result {
        Some(Ok(pair)) => Ok(pair),
        Some(Err(err)) => Err(TorrentError::HashWorker {
            detail: err.to_string(),
        }),
        None => Err(TorrentError::HashWorker {
            detail: "worker pool drained unexpectedly".to_string(),
        }),
    }
}

fn publish_progress(
    progress: Option<&watch::Sender<BuildProgress>>,
    files: &[PackageFile],
    piece_size: u64,
    total_size: u64,
    total_pieces: u64,
    pieces_hashed: u64,
) {
    let Some(sender) = progress else { return };
    let bytes_hashed = bytes_for_pieces(pieces_hashed, piece_size, total_size);
    let (current_file, _) = locate(files, bytes_hashed);
    let _ = sender.send(BuildProgress {
        bytes_hashed,
        total_bytes: total_size,
        pieces_hashed,
        total_pieces,
        current_file,
    });
}

/// Assemble the BitTorrent multi-file info dictionary.
fn build_info_dict(
    name: &str,
    files: &[PackageFile],
    piece_size: u64,
    piece_digests: &[u8],
) -> Bencode {
    let file_entries: Vec<Bencode> = files
        .iter()
        .map(|file| {
            let mut entry = BTreeMap::new();
            entry.insert(b"length".to_vec(), Bencode::Int(file.size as i64));
            entry.insert(
                b"path".to_vec(),
                Bencode::List(
                    file.relative
                        .split('/')
                        .map(Bencode::str)
                        .collect(),
                ),
            );
            Bencode::Dict(entry)
        })
        .collect();

    let mut info = BTreeMap::new();
    info.insert(b"files".to_vec(), Bencode::List(file_entries));
    info.insert(b"name".to_vec(), Bencode::str(name));
    info.insert(b"piece length".to_vec(), Bencode::Int(piece_size as i64));
    info.insert(b"pieces".to_vec(), Bencode::Bytes(piece_digests.to_vec()));
    Bencode::Dict(info)
}

/// Sequential piece-window reader over the sorted file list.
struct PieceReader<'a> {
    root: &'a Path,
    files: &'a [PackageFile],
    piece_size: u64,
    file_index: usize,
    offset_in_file: u64,
    current: Option<tokio::fs::File>,
}

impl<'a> PieceReader<'a> {
    fn new(root: &'a Path, files: &'a [PackageFile], piece_size: u64) -> Self {
        Self {
            root,
            files,
            piece_size,
            file_index: 0,
            offset_in_file: 0,
            current: None,
        }
    }

    /// Position the cursor at a global byte offset (a piece boundary).
    fn seek_to(&mut self, global_offset: u64) {
        let mut remaining = global_offset;
        let mut index = 0;
        for file in self.files {
            if remaining < file.size {
                break;
            }
            remaining -= file.size;
            index += 1;
        }
        self.file_index = index;
        self.offset_in_file = remaining;
        self.current = None;
    }

    fn path_for(&self, index: usize) -> PathBuf {
        let mut path = self.root.to_path_buf();
        for component in self.files[index].relative.split('/') {
            path.push(component);
        }
        path
    }

    async fn open_current(&mut self) -> TorrentResult<()> {
        let path = self.path_for(self.file_index);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|source| TorrentError::Io {
                path: path.clone(),
                source,
            })?;
        if self.offset_in_file > 0 {
            file.seek(std::io::SeekFrom::Start(self.offset_in_file))
                .await
                .map_err(|source| TorrentError::Io { path, source })?;
        }
        self.current = Some(file);
        Ok(())
    }

    /// Read the next piece-sized window; the final window may be shorter.
    async fn read_piece(&mut self) -> TorrentResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.piece_size as usize);
        while (buffer.len() as u64) < self.piece_size && self.file_index < self.files.len() {
            if self.files[self.file_index].size == 0 {
                self.file_index += 1;
                self.offset_in_file = 0;
                self.current = None;
                continue;
            }
            if self.current.is_none() {
                self.open_current().await?;
            }
            let want = (self.piece_size as usize) - buffer.len();
            let mut chunk = vec![0_u8; want];
            let path = self.path_for(self.file_index);
            let Some(file) = self.current.as_mut() else {
                break;
            };
            let read = file
                .read(&mut chunk)
                .await
                .map_err(|source| TorrentError::Io { path, source })?;
            if read == 0 {
                self.file_index += 1;
                self.offset_in_file = 0;
                self.current = None;
                continue;
            }
            chunk.truncate(read);
            buffer.extend_from_slice(&chunk);
            self.offset_in_file += read as u64;
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FileCheckpointStore;
    use std::fs;

    fn write_package(dir: &Path, reversed: bool) {
        let files: Vec<(&str, Vec<u8>)> = vec![
            ("ASSETMAP.xml", b"<AssetMap/>".to_vec()),
            ("CPL_demo.xml", b"<Cpl/>".to_vec()),
            ("PKL_demo.xml", b"<Pkl/>".to_vec()),
            ("picture.mxf", (0..4096).map(|i| (i % 251) as u8).collect()),
            ("sound.mxf", (0..2048).map(|i| (i % 13) as u8).collect()),
        ];
        let order: Vec<usize> = if reversed {
            (0..files.len()).rev().collect()
        } else {
            (0..files.len()).collect()
        };
        for index in order {
            let (name, data) = &files[index];
            fs::write(dir.join(name), data).expect("write file");
        }
        // Droppings that must not affect identity.
        fs::write(dir.join("download.partial"), b"junk").expect("junk");
        fs::write(dir.join("note.nfo"), b"junk").expect("junk");
        fs::write(dir.join(".hidden"), b"junk").expect("junk");
    }

    fn test_options() -> BuildOptions {
        BuildOptions {
            piece_hash_workers: 2,
            checkpoint_interval_bytes: 1024,
            piece_size: Some(1024),
        }
    }

    #[test]
    fn piece_size_policy_matches_threshold() {
        assert_eq!(select_piece_size(1), SMALL_PIECE_SIZE);
        assert_eq!(
            select_piece_size(LARGE_PACKAGE_THRESHOLD - 1),
            SMALL_PIECE_SIZE
        );
        assert_eq!(select_piece_size(LARGE_PACKAGE_THRESHOLD), LARGE_PIECE_SIZE);
    }

    #[test]
    fn enumeration_filters_and_sorts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_package(tmp.path(), false);
        let files = enumerate_files(tmp.path()).expect("enumerate");
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ASSETMAP.xml",
                "CPL_demo.xml",
                "PKL_demo.xml",
                "picture.mxf",
                "sound.mxf"
            ]
        );
    }

    #[tokio::test]
    async fn identity_is_deterministic_across_write_order() {
        let (_cancel_tx, cancel) = watch::channel(false);

        let tmp_a = tempfile::tempdir().expect("tempdir");
        let dir_a = tmp_a.path().join("Demo_FTR");
        fs::create_dir_all(&dir_a).expect("dir");
        write_package(&dir_a, false);

        let tmp_b = tempfile::tempdir().expect("tempdir");
        let dir_b = tmp_b.path().join("Demo_FTR");
        fs::create_dir_all(&dir_b).expect("dir");
        write_package(&dir_b, true);

        let built_a = build_package_torrent(&dir_a, &test_options(), None, &cancel, None)
            .await
            .expect("build a");
        let built_b = build_package_torrent(&dir_b, &test_options(), None, &cancel, None)
            .await
            .expect("build b");

        assert_eq!(built_a.info_hash, built_b.info_hash);
        assert_eq!(built_a.torrent_bytes, built_b.torrent_bytes);
        assert_eq!(built_a.file_count, 5);
        assert_eq!(built_a.total_size, 11 + 6 + 6 + 4096 + 2048);
    }

    #[tokio::test]
    async fn resume_from_checkpoint_matches_full_build() {
        let (_cancel_tx, cancel) = watch::channel(false);
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("Demo_FTR");
        fs::create_dir_all(&dir).expect("dir");
        write_package(&dir, false);

        let full = build_package_torrent(&dir, &test_options(), None, &cancel, None)
            .await
            .expect("full build");

        // Craft a checkpoint covering the first two pieces by hashing the
        // sorted concatenation directly.
        let files = enumerate_files(&dir).expect("enumerate");
        let mut stream = Vec::new();
        for file in &files {
            let mut path = dir.clone();
            for component in file.relative.split('/') {
                path.push(component);
            }
            stream.extend_from_slice(&fs::read(&path).expect("read"));
        }
        let mut digests = Vec::new();
        for piece in stream.chunks(1024).take(2) {
            digests.extend_from_slice(&Sha1::digest(piece));
        }

        let store_dir = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(store_dir.path().to_path_buf()).expect("store");
        store
            .save(
                "pkg",
                &BuildCheckpoint {
                    bytes_hashed: 2048,
                    pieces_hashed: 2,
                    last_file: "picture.mxf".to_string(),
                    last_offset: 0,
                    piece_size: 1024,
                    piece_digests: digests,
                },
            )
            .expect("save checkpoint");

        let resumed = build_package_torrent(
            &dir,
            &test_options(),
            Some((&store, "pkg")),
            &cancel,
            None,
        )
        .await
        .expect("resumed build");

        assert_eq!(resumed.info_hash, full.info_hash);
        assert_eq!(resumed.torrent_bytes, full.torrent_bytes);
        // A completed build clears its checkpoint.
        assert!(store.load("pkg").expect("load").is_none());
    }

    #[tokio::test]
    async fn cancellation_saves_a_checkpoint() {
        let (cancel_tx, cancel) = watch::channel(true);
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("Demo_FTR");
        fs::create_dir_all(&dir).expect("dir");
        write_package(&dir, false);

        let store_dir = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(store_dir.path().to_path_buf()).expect("store");

        let err = build_package_torrent(
            &dir,
            &test_options(),
            Some((&store, "pkg")),
            &cancel,
            None,
        )
        .await
        .expect_err("must cancel");
        assert!(matches!(err, TorrentError::Cancelled));
        assert!(store.load("pkg").expect("load").is_some());
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn empty_package_is_rejected() {
        let (_cancel_tx, cancel) = watch::channel(false);
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = build_package_torrent(tmp.path(), &BuildOptions::default(), None, &cancel, None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, TorrentError::EmptyPackage { .. }));
    }
}
