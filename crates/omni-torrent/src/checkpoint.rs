//! Resume checkpoints for interrupted torrent generations.
//!
//! A cancelled or crashed generation resumes from the last saved piece
//! boundary instead of rehashing the whole package. The accumulated piece
//! digests travel with the checkpoint so hashing continues mid-stream.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{TorrentError, TorrentResult};

/// Snapshot of generation progress at a piece boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCheckpoint {
    /// Bytes hashed so far.
    pub bytes_hashed: u64,
    /// Pieces hashed so far.
    pub pieces_hashed: u64,
    /// Relative path of the file the cursor stopped in.
    pub last_file: String,
    /// Offset within that file.
    pub last_offset: u64,
    /// Piece size the run was started with; a mismatch invalidates resume.
    pub piece_size: u64,
    /// Concatenated 20-byte digests of the pieces hashed so far.
    #[serde(with = "omni_proto::b64")]
    pub piece_digests: Vec<u8>,
}

/// Persistence seam for checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a package, when one exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored payload cannot be read or decoded.
    fn load(&self, key: &str) -> TorrentResult<Option<BuildCheckpoint>>;

    /// Persist the checkpoint for a package.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload cannot be written.
    fn save(&self, key: &str, checkpoint: &BuildCheckpoint) -> TorrentResult<()>;

    /// Remove the checkpoint for a package.
    ///
    /// # Errors
    ///
    /// Returns an error when removal fails for reasons other than absence.
    fn clear(&self, key: &str) -> TorrentResult<()>;
}

/// File-backed checkpoint store keeping one JSON file per package key.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn new(dir: PathBuf) -> TorrentResult<Self> {
        std::fs::create_dir_all(&dir).map_err(|source| TorrentError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are assetmap UUIDs; keep the name filesystem-safe regardless.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.checkpoint.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, key: &str) -> TorrentResult<Option<BuildCheckpoint>> {
        let path = self.path_for(key);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(TorrentError::Io { path, source }),
        };
        let checkpoint =
            serde_json::from_slice(&contents).map_err(|err| TorrentError::Checkpoint {
                detail: format!("decode {}: {err}", path.display()),
            })?;
        Ok(Some(checkpoint))
    }

    fn save(&self, key: &str, checkpoint: &BuildCheckpoint) -> TorrentResult<()> {
        let path = self.path_for(key);
        let payload =
            serde_json::to_vec(checkpoint).map_err(|err| TorrentError::Checkpoint {
                detail: format!("encode {}: {err}", path.display()),
            })?;
        std::fs::write(&path, payload).map_err(|source| TorrentError::Io { path, source })
    }

    fn clear(&self, key: &str) -> TorrentResult<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TorrentError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(tmp.path().to_path_buf()).expect("store");
        let checkpoint = BuildCheckpoint {
            bytes_hashed: 1024,
            pieces_hashed: 2,
            last_file: "picture.mxf".to_string(),
            last_offset: 512,
            piece_size: 512,
            piece_digests: vec![7_u8; 40],
        };

        store.save("am-1", &checkpoint).expect("save");
        let loaded = store.load("am-1").expect("load").expect("present");
        assert_eq!(loaded.pieces_hashed, 2);
        assert_eq!(loaded.piece_digests.len(), 40);

        store.clear("am-1").expect("clear");
        assert!(store.load("am-1").expect("load").is_none());
        // Clearing twice is a no-op.
        store.clear("am-1").expect("clear again");
    }
}
