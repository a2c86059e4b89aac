//! Site identity: MAC discovery and the persisted server id.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{SiteError, SiteResult};

/// Identity figures persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// Server row id assigned by the hub.
    pub server_id: Uuid,
    /// MAC address the identity is bound to.
    pub mac: String,
}

const IDENTITY_FILE: &str = "server-identity.json";

/// Discover the primary MAC address from sysfs, skipping loopback and
/// virtual interfaces without hardware addresses.
#[must_use]
pub fn discover_mac() -> String {
    if let Ok(forced) = std::env::var("OMNICLOUD_MAC") {
        return forced;
    }
    if let Ok(entries) = std::fs::read_dir("/sys/class/net") {
        let mut names: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        names.sort();
        for path in names {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == "lo" {
                continue;
            }
            if let Ok(address) = std::fs::read_to_string(path.join("address")) {
                let address = address.trim();
                if !address.is_empty() && address != "00:00:00:00:00:00" {
                    return address.to_string();
                }
            }
        }
    }
    warn!("no usable network interface found; using placeholder MAC");
    "02:00:00:00:00:01".to_string()
}

/// Load the persisted identity, when present.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be decoded.
pub fn load_identity(state_dir: &Path) -> SiteResult<Option<StoredIdentity>> {
    let path = state_dir.join(IDENTITY_FILE);
    let contents = match std::fs::read(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SiteError::Io { path, source }),
    };
    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|err| SiteError::State {
            detail: format!("decode {}: {err}", path.display()),
        })
}

/// Persist the identity assigned by the hub.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn save_identity(state_dir: &Path, identity: &StoredIdentity) -> SiteResult<()> {
    std::fs::create_dir_all(state_dir).map_err(|source| SiteError::Io {
        path: state_dir.to_path_buf(),
        source,
    })?;
    let path = state_dir.join(IDENTITY_FILE);
    let payload = serde_json::to_vec_pretty(identity).map_err(|err| SiteError::State {
        detail: format!("encode identity: {err}"),
    })?;
    std::fs::write(&path, payload).map_err(|source| SiteError::Io { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_disk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(load_identity(tmp.path()).expect("load").is_none());

        let identity = StoredIdentity {
            server_id: Uuid::new_v4(),
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
        };
        save_identity(tmp.path(), &identity).expect("save");
        let loaded = load_identity(tmp.path()).expect("load").expect("present");
        assert_eq!(loaded.server_id, identity.server_id);
        assert_eq!(loaded.mac, identity.mac);
    }
}
