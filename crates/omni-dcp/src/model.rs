//! Metadata types produced by the DCP parser.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parsed description of one DCP folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// UUID of the ASSETMAP, the fleet-wide package identity.
    pub assetmap_uuid: Uuid,
    /// Directory name of the package on disk.
    pub package_name: String,
    /// Human-readable content title (usually the CPL annotation).
    pub content_title: String,
    /// Content kind label (`feature`, `trailer`, `advertisement`, ...).
    pub content_kind: String,
    /// Sum of all asset sizes in bytes.
    pub total_size_bytes: u64,
    /// Number of files that make up the package.
    pub file_count: u32,
    /// Compositions listed by the package.
    pub compositions: Vec<CompositionInfo>,
    /// Assets listed by the package.
    pub assets: Vec<AssetInfo>,
}

/// One composition playlist within a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionInfo {
    /// UUID of the CPL.
    pub cpl_uuid: Uuid,
    /// Edit rate label, e.g. `24 1`.
    pub edit_rate: String,
    /// Picture resolution label, e.g. `2K` or `4K`.
    pub resolution: String,
    /// Sound configuration label, e.g. `5.1` or `7.1`.
    pub sound_config: String,
    /// Number of reels.
    pub reel_count: u32,
    /// Total duration in frames across reels.
    pub duration_frames: u64,
}

/// One asset file within a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    /// UUID of the asset as listed in the ASSETMAP.
    pub asset_uuid: Uuid,
    /// Path relative to the package root.
    pub file_path: PathBuf,
    /// Bare file name.
    pub file_name: String,
    /// Asset type label (`picture`, `sound`, `subtitle`, `metadata`).
    pub asset_type: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Hash algorithm named by the PKL, when present.
    pub hash_algorithm: Option<String>,
    /// Hash value named by the PKL, when present.
    pub hash_value: Option<String>,
}

impl PackageMetadata {
    /// Whether the metadata describes at least one playable composition.
    #[must_use]
    pub fn has_compositions(&self) -> bool {
        !self.compositions.is_empty()
    }
}
