#![forbid(unsafe_code)]

//! Shared hub↔site wire DTOs for OmniCloud.
//!
//! These types are used by the hub's HTTP handlers and by the site runtime
//! for request/response encoding, keeping the contract a single source of
//! truth on both ends of the link. Binary payloads (torrent blobs,
//! canonical XML bytes) travel base64-encoded inside JSON.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod b64 {
    //! Base64 (standard alphabet) serde adapter for `Vec<u8>` fields.

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as a base64 string.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize bytes from a base64 string.
    ///
    /// # Errors
    ///
    /// Fails when the payload is not valid base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Stable error body returned by every failing API call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Short machine-stable error key.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Identity & registration
// ---------------------------------------------------------------------------

/// Payload a site posts to `POST /servers/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Display name for the server.
    pub name: String,
    /// Free-form location string.
    pub location: String,
    /// Base URL where the site's own API is reachable.
    pub api_url: String,
    /// MAC address binding the server identity.
    pub mac: String,
    /// Shared registration secret (verbatim on first contact, re-checked
    /// against the stored digest afterwards).
    pub registration_key: String,
    /// Reported storage capacity in bytes.
    #[serde(default)]
    pub storage_capacity: Option<u64>,
    /// Software version string.
    pub software_version: String,
}

/// Response to a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Identifier assigned to the server row.
    pub server_id: Uuid,
    /// Whether an admin has authorized this server yet.
    pub is_authorized: bool,
}

/// Optional figures carried by a heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Reported storage capacity in bytes.
    #[serde(default)]
    pub storage_capacity: Option<u64>,
    /// Software version string.
    #[serde(default)]
    pub software_version: Option<String>,
    /// Number of packages the site currently holds.
    #[serde(default)]
    pub package_count: Option<u32>,
}

// ---------------------------------------------------------------------------
// Inventory & package metadata sync
// ---------------------------------------------------------------------------

/// Inventory availability states a site can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    /// Package is present and complete on disk.
    Online,
    /// Package was seen before but is currently missing.
    Offline,
    /// Package is present but not yet complete.
    Incomplete,
}

/// One inventory row in a bulk upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    /// ASSETMAP UUID identifying the package fleet-wide.
    pub assetmap_uuid: Uuid,
    /// Absolute path of the package on the reporting site.
    pub local_path: String,
    /// Availability state.
    pub status: InventoryStatus,
}

/// Bulk inventory report posted after a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReport {
    /// Inventory rows, one per package.
    pub items: Vec<InventoryItem>,
    /// Package metadata for packages the hub has not seen yet.
    #[serde(default)]
    pub packages: Vec<PackageDescriptor>,
}

/// Metadata describing a package, shipped on first discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// ASSETMAP UUID.
    pub assetmap_uuid: Uuid,
    /// Directory name of the package.
    pub package_name: String,
    /// Content title.
    pub content_title: String,
    /// Content kind label.
    pub content_kind: String,
    /// Total size in bytes.
    pub total_size_bytes: u64,
    /// Number of files.
    pub file_count: u32,
    /// Compositions within the package.
    #[serde(default)]
    pub compositions: Vec<CompositionDescriptor>,
    /// Assets within the package.
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
}

/// Composition metadata within a [`PackageDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionDescriptor {
    /// CPL UUID.
    pub cpl_uuid: Uuid,
    /// Edit rate label.
    pub edit_rate: String,
    /// Resolution label.
    pub resolution: String,
    /// Sound configuration label.
    pub sound_config: String,
    /// Reel count.
    pub reel_count: u32,
    /// Duration in frames.
    pub duration_frames: u64,
}

/// Asset metadata within a [`PackageDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Asset UUID.
    pub asset_uuid: Uuid,
    /// Path relative to the package root.
    pub file_path: String,
    /// Bare file name.
    pub file_name: String,
    /// Asset type label.
    pub asset_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Hash algorithm named by the PKL.
    #[serde(default)]
    pub hash_algorithm: Option<String>,
    /// Hash value named by the PKL.
    #[serde(default)]
    pub hash_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Torrent generation
// ---------------------------------------------------------------------------

/// Answer to a site asking what to do about a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAction {
    /// No torrent exists and nobody is generating: claim and hash.
    Hash,
    /// Another server is generating; wait for it to publish.
    Wait,
    /// A torrent exists; download (or seed) it.
    Download,
}

/// Request body for `POST /servers/{id}/hash-check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashCheckRequest {
    /// ASSETMAP UUID of the package in question.
    pub assetmap_uuid: Uuid,
}

/// Response body for a hash check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashCheckResponse {
    /// What the asking site should do.
    pub action: HashAction,
    /// Hub-side package identifier, for the follow-up claim call.
    pub package_id: Uuid,
    /// Display name of the server currently generating, when waiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashing_server: Option<String>,
    /// Progress percentage of the in-flight generation, when waiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Hex info hash of the existing torrent, when downloading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
}

/// Request body for `POST /servers/{id}/torrent-queue/claim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Package the site wants to generate for.
    pub package_id: Uuid,
}

/// Request body for `POST /torrents` (torrent registration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterTorrentRequest {
    /// ASSETMAP UUID resolving the package.
    pub assetmap_uuid: Uuid,
    /// Hex-encoded 20-byte info hash.
    pub info_hash: String,
    /// Raw `.torrent` file bytes.
    #[serde(with = "b64")]
    pub torrent_bytes: Vec<u8>,
    /// Piece size in bytes.
    pub piece_size: u64,
    /// Number of pieces.
    pub total_pieces: u64,
    /// Number of files.
    pub file_count: u32,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Canonical non-MXF files (XMLs), for the canonical-XML exchange.
    #[serde(default)]
    pub canonical_files: Vec<CanonicalFile>,
}

/// Response body for torrent registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterTorrentResponse {
    /// Identifier of the (possibly pre-existing) torrent row.
    pub torrent_id: Uuid,
    /// Whether this call created the row or found it already registered.
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Status reports (site → hub)
// ---------------------------------------------------------------------------

/// Activity states a piece engine reports per torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentActivity {
    /// Waiting for the engine to start it.
    Queued,
    /// Verifying existing on-disk data.
    Checking,
    /// Re-verifying after a restart.
    Verifying,
    /// Fetching pieces from the swarm.
    Downloading,
    /// Uploading to peers with a complete copy.
    Seeding,
    /// Download finished, payload complete.
    Completed,
    /// Paused by operator command.
    Paused,
    /// Stopped without error.
    Stopped,
    /// Failed with an error message.
    Error,
}

/// Per-torrent status figures inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentStatusItem {
    /// Hex-encoded info hash.
    pub info_hash: String,
    /// Engine activity state.
    pub status: TorrentActivity,
    /// Whether the torrent is loaded into the engine.
    #[serde(default)]
    pub is_loaded: bool,
    /// Whether the engine is actively seeding it.
    #[serde(default)]
    pub is_seeding: bool,
    /// Whether the engine is actively downloading it.
    #[serde(default)]
    pub is_downloading: bool,
    /// Completion percentage (0-100).
    pub progress_percent: f64,
    /// Bytes completed.
    pub bytes_completed: u64,
    /// Total bytes expected.
    pub bytes_total: u64,
    /// Pieces completed.
    pub pieces_completed: u64,
    /// Total pieces.
    pub pieces_total: u64,
    /// Current download speed in bytes per second.
    #[serde(default)]
    pub download_speed_bps: u64,
    /// Current upload speed in bytes per second.
    #[serde(default)]
    pub upload_speed_bps: u64,
    /// Lifetime uploaded bytes.
    #[serde(default)]
    pub uploaded_bytes: u64,
    /// Connected peer count.
    #[serde(default)]
    pub peers_connected: u32,
    /// Estimated seconds to completion.
    #[serde(default)]
    pub eta_seconds: Option<u64>,
    /// Error detail when `status = error`.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Queue item status inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusItem {
    /// ASSETMAP UUID resolving the package.
    pub assetmap_uuid: Uuid,
    /// Queue state label (`queued`, `generating`, `completed`, `failed`,
    /// `cancelled`).
    pub status: String,
    /// Hashing progress percentage (0-100).
    pub progress_percent: f64,
    /// File currently being hashed.
    #[serde(default)]
    pub current_file: Option<String>,
    /// Total payload size in bytes.
    #[serde(default)]
    pub total_size: u64,
    /// Observed hashing speed in bytes per second.
    #[serde(default)]
    pub hashing_speed_bps: Option<u64>,
    /// Error detail when failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Periodic status report a site posts to the hub (~10 s cadence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Report timestamp at the site.
    pub timestamp: DateTime<Utc>,
    /// When set, the payload replaces all queue rows for this site.
    #[serde(default)]
    pub is_full_sync: bool,
    /// Whether the site believes it sits behind NAT.
    #[serde(default)]
    pub is_behind_nat: Option<bool>,
    /// Whether the site registered with the relay collaborator.
    #[serde(default)]
    pub relay_registered: Option<bool>,
    /// Torrent status figures.
    #[serde(default)]
    pub torrents: Vec<TorrentStatusItem>,
    /// Queue status figures.
    #[serde(default)]
    pub queue_items: Vec<QueueStatusItem>,
    /// Free-form queue counters (for the UI).
    #[serde(default)]
    pub queue_stats: Option<HashMap<String, i64>>,
}

// ---------------------------------------------------------------------------
// Transfers & commands (hub → site)
// ---------------------------------------------------------------------------

/// User-controllable transfer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCommandKind {
    /// Pause an active transfer.
    Pause,
    /// Resume a paused transfer.
    Resume,
    /// Cancel a transfer, optionally deleting data.
    Cancel,
}

/// A transfer command delivered to its destination site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    /// Transfer row the command refers to.
    pub transfer_id: Uuid,
    /// Hex-encoded info hash of the content.
    pub info_hash: String,
    /// The command itself.
    pub command: TransferCommandKind,
    /// For `cancel`: whether on-disk data should be removed.
    #[serde(default)]
    pub delete_data: bool,
}

/// Result labels a site reports back for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    /// Command executed.
    Done,
    /// Content was removed from disk.
    Deleted,
    /// Content was intentionally kept on disk.
    Kept,
    /// Command failed; see message.
    Error,
}

/// Acknowledgement for a transfer command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommandAck {
    /// Transfer row the ack refers to.
    pub transfer_id: Uuid,
    /// Execution outcome.
    pub result: CommandResult,
    /// Optional human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
}

/// A content command (currently only deletion) delivered to a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCommand {
    /// Stable identifier for dedup across retries.
    pub command_id: Uuid,
    /// Package the command refers to.
    pub assetmap_uuid: Uuid,
    /// Action label (`delete`).
    pub action: String,
}

/// Acknowledgement for a content command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCommandAck {
    /// Command the ack refers to.
    pub command_id: Uuid,
    /// Execution outcome.
    pub result: CommandResult,
    /// Optional human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
}

/// Server-level actions delivered through `pending-action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerAction {
    /// Upgrade to the named version.
    Upgrade {
        /// Target version string.
        version: String,
    },
    /// Restart the server process.
    Restart,
    /// Trigger a library rescan.
    Rescan,
}

/// Completion report for a server action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDone {
    /// Action label that completed (`upgrade`, `restart`, `rescan`).
    pub action: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Optional detail.
    #[serde(default)]
    pub message: Option<String>,
}

/// A new transfer assignment surfaced through `pending-transfers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransfer {
    /// Transfer row identifier.
    pub transfer_id: Uuid,
    /// Hex-encoded info hash to download.
    pub info_hash: String,
    /// ASSETMAP UUID of the package.
    pub assetmap_uuid: Uuid,
    /// Total size in bytes.
    pub total_size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Canonical XML exchange
// ---------------------------------------------------------------------------

/// Request body for `POST /servers/{id}/canonical-xml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalXmlRequest {
    /// CPL UUID held by the asking site.
    pub cpl_uuid: Uuid,
}

/// One canonical non-MXF file to overwrite on the asking site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFile {
    /// Path relative to the package root.
    pub relative_path: String,
    /// Exact canonical bytes.
    #[serde(with = "b64")]
    pub bytes: Vec<u8>,
}

/// Response body for the canonical-XML exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalXmlResponse {
    /// Package identifier on the hub.
    pub package_id: Uuid,
    /// ASSETMAP UUID of the package.
    pub assetmap_uuid: Uuid,
    /// Hex-encoded canonical info hash.
    pub info_hash: String,
    /// Canonical `.torrent` bytes.
    #[serde(with = "b64")]
    pub torrent_file: Vec<u8>,
    /// Canonical non-MXF files keyed by relative path.
    pub files: Vec<CanonicalFile>,
}

// ---------------------------------------------------------------------------
// Command-link frames (push substrate)
// ---------------------------------------------------------------------------

/// Newline-delimited JSON frames exchanged over the site-dialled link socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkFrame {
    /// First frame a site sends after connecting.
    Hello {
        /// Server row identifier.
        server_id: Uuid,
        /// MAC address bound to the identity.
        mac: String,
    },
    /// Keep-alive probe (either direction).
    Ping,
    /// Keep-alive answer.
    Pong,
    /// Transfer command pushed by the hub.
    TransferCommand {
        /// The command payload.
        command: TransferCommand,
    },
    /// Content command pushed by the hub.
    ContentCommand {
        /// The command payload.
        command: ContentCommand,
    },
    /// Server action pushed by the hub.
    ServerAction {
        /// The action payload.
        action: ServerAction,
    },
}

/// How a command reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRoute {
    /// Pushed over the live link socket.
    Push,
    /// Parked for the site's next poll.
    Poll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_bytes_round_trip_base64() {
        let request = RegisterTorrentRequest {
            assetmap_uuid: Uuid::nil(),
            info_hash: "aa".repeat(20),
            torrent_bytes: vec![0_u8, 1, 2, 250],
            piece_size: 16 * 1024 * 1024,
            total_pieces: 10,
            file_count: 3,
            total_size: 160 * 1024 * 1024,
            canonical_files: Vec::new(),
        };
        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("\"torrent_bytes\":\"AAEC+g==\""));
        let back: RegisterTorrentRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.torrent_bytes, request.torrent_bytes);
    }

    #[test]
    fn link_frames_tag_their_type() {
        let frame = LinkFrame::TransferCommand {
            command: TransferCommand {
                transfer_id: Uuid::nil(),
                info_hash: "00".repeat(20),
                command: TransferCommandKind::Pause,
                delete_data: false,
            },
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        assert!(json.contains("\"type\":\"transfer_command\""));
        assert!(json.contains("\"command\":\"pause\""));
    }

    #[test]
    fn status_report_defaults_optional_sections() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z"}"#;
        let report: StatusReport = serde_json::from_str(json).expect("deserialize");
        assert!(!report.is_full_sync);
        assert!(report.torrents.is_empty());
        assert!(report.queue_items.is_empty());
        assert!(report.queue_stats.is_none());
    }
}
