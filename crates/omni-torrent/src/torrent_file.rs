//! `.torrent` assembly, announce rewriting, and summary extraction.
//!
//! Stored blobs carry an internal placeholder announce URL; the hub
//! rewrites it to its own tracker address whenever a blob is served, so the
//! same stored bytes work for every requesting host.

use std::collections::BTreeMap;

use crate::bencode::Bencode;
use crate::error::{TorrentError, TorrentResult};
use crate::info_hash::InfoHash;

/// Announce URL stored inside blobs at rest.
pub const ANNOUNCE_PLACEHOLDER: &str = "http://tracker.internal/announce";

/// Client string written into the `created by` field.
const CREATED_BY: &str = "omnicloud";

/// Wrap an info dictionary into a full `.torrent` document with the
/// internal announce placeholder.
#[must_use]
pub fn assemble(info: Bencode) -> Vec<u8> {
    let mut root = BTreeMap::new();
    root.insert(b"announce".to_vec(), Bencode::str(ANNOUNCE_PLACEHOLDER));
    root.insert(b"created by".to_vec(), Bencode::str(CREATED_BY));
    root.insert(b"info".to_vec(), info);
    Bencode::Dict(root).encode()
}

/// Rewrite the announce URL in a stored blob, leaving the info dictionary
/// byte-identical (re-encoding through sorted dicts is canonical).
///
/// # Errors
///
/// Returns an error when the blob is not a bencoded dictionary.
pub fn rewrite_announce(torrent_bytes: &[u8], announce_url: &str) -> TorrentResult<Vec<u8>> {
    let decoded = Bencode::decode(torrent_bytes)?;
    let Bencode::Dict(mut root) = decoded else {
        return Err(TorrentError::InvalidTorrent {
            reason: "top-level value is not a dictionary",
        });
    };
    root.insert(b"announce".to_vec(), Bencode::str(announce_url));
    Ok(Bencode::Dict(root).encode())
}

/// Figures extracted from a `.torrent` blob.
#[derive(Debug, Clone)]
pub struct TorrentSummary {
    /// SHA-1 of the bencoded info dictionary.
    pub info_hash: InfoHash,
    /// Payload name (the package directory name).
    pub name: String,
    /// Piece size in bytes.
    pub piece_size: u64,
    /// Piece count.
    pub total_pieces: u64,
    /// File count.
    pub file_count: u32,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Payload files in info-dict order.
    pub files: Vec<TorrentFileEntry>,
}

/// One payload file inside a [`TorrentSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileEntry {
    /// Relative path, forward-slash separated.
    pub path: String,
    /// Length in bytes.
    pub length: u64,
}

/// Decode a blob and extract its identity and figures.
///
/// # Errors
///
/// Returns an error when the blob is malformed or misses required keys.
pub fn summarize(torrent_bytes: &[u8]) -> TorrentResult<TorrentSummary> {
    let decoded = Bencode::decode(torrent_bytes)?;
    let root = decoded.as_dict().ok_or(TorrentError::InvalidTorrent {
        reason: "top-level value is not a dictionary",
    })?;
    let info = root
        .get(b"info".as_slice())
        .ok_or(TorrentError::InvalidTorrent {
            reason: "missing info dictionary",
        })?;
    let info_hash = InfoHash::from_info_bytes(&info.encode());
    let info = info.as_dict().ok_or(TorrentError::InvalidTorrent {
        reason: "info is not a dictionary",
    })?;

    let name = info
        .get(b"name".as_slice())
        .and_then(Bencode::as_bytes)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .ok_or(TorrentError::InvalidTorrent {
            reason: "missing name",
        })?;
    let piece_size = info
        .get(b"piece length".as_slice())
        .and_then(Bencode::as_int)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or(TorrentError::InvalidTorrent {
            reason: "missing piece length",
        })?;
    let pieces = info
        .get(b"pieces".as_slice())
        .and_then(Bencode::as_bytes)
        .ok_or(TorrentError::InvalidTorrent {
            reason: "missing pieces",
        })?;
    if pieces.len() % 20 != 0 {
        return Err(TorrentError::InvalidTorrent {
            reason: "pieces length is not a digest multiple",
        });
    }

    let mut total_size = 0_u64;
    let mut entries = Vec::new();
    match info.get(b"files".as_slice()) {
        Some(Bencode::List(files)) => {
            for entry in files {
                let Some(entry) = entry.as_dict() else {
                    return Err(TorrentError::InvalidTorrent {
                        reason: "file entry is not a dictionary",
                    });
                };
                let length = entry
                    .get(b"length".as_slice())
                    .and_then(Bencode::as_int)
                    .and_then(|v| u64::try_from(v).ok())
                    .ok_or(TorrentError::InvalidTorrent {
                        reason: "file entry missing length",
                    })?;
                total_size += length;
                let path = match entry.get(b"path".as_slice()) {
                    Some(Bencode::List(components)) => components
                        .iter()
                        .filter_map(Bencode::as_bytes)
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        .collect::<Vec<_>>()
                        .join("/"),
                    _ => {
                        return Err(TorrentError::InvalidTorrent {
                            reason: "file entry missing path",
                        });
                    }
                };
                entries.push(TorrentFileEntry { path, length });
            }
        }
        _ => {
            // Single-file form: `length` at the info level.
            let length = info
                .get(b"length".as_slice())
                .and_then(Bencode::as_int)
                .and_then(|v| u64::try_from(v).ok())
                .ok_or(TorrentError::InvalidTorrent {
                    reason: "missing files list and length",
                })?;
            total_size = length;
            entries.push(TorrentFileEntry {
                path: name.clone(),
                length,
            });
        }
    }

    Ok(TorrentSummary {
        info_hash,
        name,
        piece_size,
        total_pieces: (pieces.len() / 20) as u64,
        file_count: entries.len() as u32,
        total_size,
        files: entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_info() -> Bencode {
        let mut file = BTreeMap::new();
        file.insert(b"length".to_vec(), Bencode::Int(2048));
        file.insert(
            b"path".to_vec(),
            Bencode::List(vec![Bencode::str("picture.mxf")]),
        );
        let mut info = BTreeMap::new();
        info.insert(b"files".to_vec(), Bencode::List(vec![Bencode::Dict(file)]));
        info.insert(b"name".to_vec(), Bencode::str("Demo_FTR"));
        info.insert(b"piece length".to_vec(), Bencode::Int(1024));
        info.insert(b"pieces".to_vec(), Bencode::Bytes(vec![0_u8; 40]));
        Bencode::Dict(info)
    }

    #[test]
    fn announce_rewrite_preserves_info_hash() {
        let blob = assemble(demo_info());
        let original = summarize(&blob).expect("summary");

        let rewritten =
            rewrite_announce(&blob, "http://hub.example:9090/announce").expect("rewrite");
        let after = summarize(&rewritten).expect("summary");

        assert_eq!(original.info_hash, after.info_hash);
        let text = String::from_utf8_lossy(&rewritten);
        assert!(text.contains("hub.example:9090"));
        assert!(!text.contains("tracker.internal"));
    }

    #[test]
    fn summary_extracts_figures() {
        let blob = assemble(demo_info());
        let summary = summarize(&blob).expect("summary");
        assert_eq!(summary.name, "Demo_FTR");
        assert_eq!(summary.piece_size, 1024);
        assert_eq!(summary.total_pieces, 2);
        assert_eq!(summary.file_count, 1);
        assert_eq!(summary.total_size, 2048);
        assert_eq!(
            summary.files,
            vec![TorrentFileEntry {
                path: "picture.mxf".to_string(),
                length: 2048
            }]
        );
    }

    #[test]
    fn malformed_blob_is_rejected() {
        assert!(summarize(b"not bencode").is_err());
        assert!(rewrite_announce(b"i1e", "http://x").is_err());
    }
}
