//! Status enums, the transfer state machine, and row structs.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{DataError, DataResult};

/// Transfer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// Created, waiting for the destination to pick it up.
    Queued,
    /// Destination is verifying existing on-disk data.
    Checking,
    /// Pieces are moving.
    Downloading,
    /// Paused by operator command.
    Paused,
    /// Failed with an error message; retryable.
    Error,
    /// Failed by the system (stall reaper etc.); retryable.
    Failed,
    /// Cancelled by operator; terminal.
    Cancelled,
    /// Finished; terminal.
    Completed,
}

impl TransferStatus {
    /// Stable label stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse a stored label.
    ///
    /// # Errors
    ///
    /// Returns an error for unrecognized labels.
    pub fn parse(value: &str) -> DataResult<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "checking" => Ok(Self::Checking),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(DataError::UnknownStatus {
                value: other.to_string(),
            }),
        }
    }

    /// States a transfer may be in immediately before entering `self`.
    ///
    /// This table IS the state machine; every transition helper guards its
    /// `UPDATE` with it, so concurrent writers cannot skip states.
    #[must_use]
    pub const fn allowed_prior(self) -> &'static [Self] {
        match self {
            Self::Queued => &[Self::Error, Self::Failed, Self::Cancelled],
            Self::Checking => &[Self::Queued],
            Self::Downloading => &[Self::Queued, Self::Checking, Self::Paused],
            Self::Paused => &[Self::Queued, Self::Checking, Self::Downloading],
            Self::Completed => &[Self::Checking, Self::Downloading],
            Self::Error | Self::Failed => {
                &[Self::Queued, Self::Checking, Self::Downloading, Self::Paused]
            }
            Self::Cancelled => &[
                Self::Queued,
                Self::Checking,
                Self::Downloading,
                Self::Paused,
                Self::Error,
                Self::Failed,
            ],
        }
    }

    /// Whether the state accepts live progress figures from site reports.
    #[must_use]
    pub const fn accepts_progress(self) -> bool {
        matches!(self, Self::Queued | Self::Checking | Self::Downloading)
    }

    /// Whether the state is terminal (no further transitions except none).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Whether an operator may retry from this state.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Error | Self::Failed | Self::Cancelled)
    }

    /// Labels of [`Self::allowed_prior`], for SQL `= ANY($n)` guards.
    #[must_use]
    pub fn allowed_prior_labels(self) -> Vec<String> {
        self.allowed_prior()
            .iter()
            .map(|status| status.as_str().to_string())
            .collect()
    }
}

/// Torrent-generation queue states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    /// Waiting for a generation slot.
    Queued,
    /// Hashing in progress on the owning server.
    Generating,
    /// Torrent registered.
    Completed,
    /// Generation failed; retryable.
    Failed,
    /// Generation cancelled.
    Cancelled,
}

impl QueueStatus {
    /// Stable label stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored label.
    ///
    /// # Errors
    ///
    /// Returns an error for unrecognized labels.
    pub fn parse(value: &str) -> DataResult<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DataError::UnknownStatus {
                value: other.to_string(),
            }),
        }
    }

    /// Whether the state releases the fleet-wide generation claim.
    #[must_use]
    pub const fn releases_claim(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Seeder row states, stored verbatim as sites report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeederStatus {
    /// Actively seeding.
    Seeding,
    /// Holds a complete copy without actively seeding.
    Completed,
    /// Stopped.
    Stopped,
}

impl SeederStatus {
    /// Stable label stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seeding => "seeding",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

/// Server upgrade bookkeeping states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    /// Nothing in flight.
    Idle,
    /// Upgrade command issued, not yet started.
    Pending,
    /// Site reported it is upgrading.
    Upgrading,
    /// Upgrade finished successfully.
    Success,
    /// Upgrade failed.
    Failed,
}

impl UpgradeStatus {
    /// Stable label stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Upgrading => "upgrading",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One row of `servers`.
#[derive(Debug, Clone, FromRow)]
pub struct ServerRow {
    /// Server identifier.
    pub id: Uuid,
    /// MAC address binding the identity.
    pub mac: String,
    /// Display name.
    pub display_name: String,
    /// Location string.
    pub location: String,
    /// Site API base URL.
    pub api_url: String,
    /// SHA-256 hex digest of the accepted registration key.
    pub registration_key_hash: String,
    /// Admin authorization flag.
    pub is_authorized: bool,
    /// Last contact timestamp.
    pub last_seen: Option<DateTime<Utc>>,
    /// Reported storage capacity in bytes.
    pub storage_capacity: Option<i64>,
    /// Reported software version.
    pub software_version: Option<String>,
    /// Reported package count.
    pub package_count: Option<i32>,
    /// Upgrade bookkeeping state label.
    pub upgrade_status: String,
    /// Upgrade target version.
    pub target_version: Option<String>,
    /// NAT self-report.
    pub is_behind_nat: bool,
    /// Relay registration self-report.
    pub relay_registered: bool,
    /// When the NAT state was last reported.
    pub nat_last_checked: Option<DateTime<Utc>>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One row of `packages`.
#[derive(Debug, Clone, FromRow)]
pub struct PackageRow {
    /// Package identifier.
    pub id: Uuid,
    /// ASSETMAP UUID.
    pub assetmap_uuid: Uuid,
    /// Directory name.
    pub package_name: String,
    /// Content title.
    pub content_title: String,
    /// Content kind label.
    pub content_kind: String,
    /// Total size in bytes.
    pub total_size_bytes: i64,
    /// File count.
    pub file_count: i32,
    /// First discovery timestamp.
    pub discovered_at: DateTime<Utc>,
    /// Last verification timestamp.
    pub last_verified: Option<DateTime<Utc>>,
}

/// One row of `compositions`.
#[derive(Debug, Clone, FromRow)]
pub struct CompositionRow {
    /// Row identifier.
    pub id: Uuid,
    /// Owning package.
    pub package_id: Uuid,
    /// CPL UUID.
    pub cpl_uuid: Uuid,
    /// Edit rate label.
    pub edit_rate: String,
    /// Resolution label.
    pub resolution: String,
    /// Sound configuration label.
    pub sound_config: String,
    /// Reel count.
    pub reel_count: i32,
    /// Duration in frames.
    pub duration_frames: i64,
}

/// One row of `assets`.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    /// Row identifier.
    pub id: Uuid,
    /// Owning package.
    pub package_id: Uuid,
    /// Asset UUID.
    pub asset_uuid: Uuid,
    /// Path relative to the package root.
    pub file_path: String,
    /// Bare file name.
    pub file_name: String,
    /// Asset type label.
    pub asset_type: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// Hash algorithm named by the PKL.
    pub hash_algorithm: Option<String>,
    /// Hash value named by the PKL.
    pub hash_value: Option<String>,
}

/// One row of `server_inventory`.
#[derive(Debug, Clone, FromRow)]
pub struct InventoryRow {
    /// Owning server.
    pub server_id: Uuid,
    /// Package held.
    pub package_id: Uuid,
    /// Absolute path on the site.
    pub local_path: String,
    /// Availability label (`online`, `offline`, `incomplete`).
    pub status: String,
    /// Last verification timestamp.
    pub last_verified: DateTime<Utc>,
}

/// One row of `torrents`, without the blob.
#[derive(Debug, Clone, FromRow)]
pub struct TorrentRow {
    /// Torrent identifier.
    pub id: Uuid,
    /// Owning package (unique: one torrent per package).
    pub package_id: Uuid,
    /// Hex-encoded info hash.
    pub info_hash: String,
    /// Piece size in bytes.
    pub piece_size: i64,
    /// Piece count.
    pub total_pieces: i64,
    /// File count.
    pub file_count: i32,
    /// Total payload size in bytes.
    pub total_size_bytes: i64,
    /// Server that generated the torrent.
    pub created_by_server: Option<Uuid>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

/// One row of `torrent_queue`.
#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    /// Row identifier.
    pub id: Uuid,
    /// Package being generated.
    pub package_id: Uuid,
    /// Server doing (or waiting to do) the generation.
    pub server_id: Uuid,
    /// Queue state label.
    pub status: String,
    /// Hashing progress percentage.
    pub progress_percent: f64,
    /// File currently being hashed.
    pub current_file: Option<String>,
    /// Total payload size in bytes.
    pub total_size: i64,
    /// Observed hashing speed.
    pub hashing_speed_bps: Option<i64>,
    /// Reorder position within `queued`.
    pub position: i32,
    /// Error detail when failed.
    pub error_message: Option<String>,
    /// Enqueue timestamp.
    pub queued_at: DateTime<Utc>,
    /// Generation start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last update timestamp (drives the stall reaper).
    pub updated_at: DateTime<Utc>,
}

/// One row of `seeders`.
#[derive(Debug, Clone, FromRow)]
pub struct SeederRow {
    /// Torrent being seeded.
    pub torrent_id: Uuid,
    /// Seeding server.
    pub server_id: Uuid,
    /// Seeder state label.
    pub status: String,
    /// Lifetime uploaded bytes.
    pub uploaded_bytes: i64,
    /// Last announce timestamp.
    pub last_announce: DateTime<Utc>,
}

/// One row of `transfers`.
#[derive(Debug, Clone, FromRow)]
pub struct TransferRow {
    /// Transfer identifier.
    pub id: Uuid,
    /// Torrent being transferred.
    pub torrent_id: Uuid,
    /// Destination server.
    pub destination_server_id: Uuid,
    /// Optional preferred source server.
    pub source_server_id: Option<Uuid>,
    /// Who requested the transfer.
    pub requested_by: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Transfer state label.
    pub status: String,
    /// Completion percentage.
    pub progress_percent: f64,
    /// Bytes downloaded.
    pub downloaded_bytes: i64,
    /// Total bytes expected.
    pub total_size_bytes: i64,
    /// Current download speed.
    pub download_speed_bps: i64,
    /// Current upload speed.
    pub upload_speed_bps: i64,
    /// Connected peers.
    pub peers_connected: i32,
    /// Estimated seconds to completion.
    pub eta_seconds: Option<i64>,
    /// Command awaiting delivery (`pause`, `resume`, `cancel`).
    pub pending_command: Option<String>,
    /// Whether the last command was acknowledged.
    pub command_acknowledged: bool,
    /// Whether a cancel should delete on-disk data.
    pub delete_data: bool,
    /// Error detail when failed.
    pub error_message: Option<String>,
    /// First activity timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One row of `server_torrent_stats`.
#[derive(Debug, Clone, FromRow)]
pub struct StatsRow {
    /// Reporting server.
    pub server_id: Uuid,
    /// Hex-encoded info hash.
    pub info_hash: String,
    /// Activity label as reported.
    pub status: String,
    /// Whether the torrent is loaded.
    pub is_loaded: bool,
    /// Whether the engine is seeding it.
    pub is_seeding: bool,
    /// Whether the engine is downloading it.
    pub is_downloading: bool,
    /// Completion percentage.
    pub progress_percent: f64,
    /// Bytes completed.
    pub bytes_completed: i64,
    /// Total bytes.
    pub bytes_total: i64,
    /// Pieces completed.
    pub pieces_completed: i64,
    /// Total pieces.
    pub pieces_total: i64,
    /// Download speed.
    pub download_speed_bps: i64,
    /// Upload speed.
    pub upload_speed_bps: i64,
    /// Lifetime uploaded bytes.
    pub uploaded_bytes: i64,
    /// Connected peers.
    pub peers_connected: i32,
    /// Estimated seconds to completion.
    pub eta_seconds: Option<i64>,
    /// Error detail.
    pub error_message: Option<String>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One row of `content_commands`.
#[derive(Debug, Clone, FromRow)]
pub struct ContentCommandRow {
    /// Stable command identifier.
    pub command_id: Uuid,
    /// Target server.
    pub server_id: Uuid,
    /// Target package.
    pub package_id: Uuid,
    /// Action label.
    pub action: String,
    /// Whether the site acknowledged execution.
    pub acknowledged: bool,
    /// Reported result label.
    pub result: Option<String>,
    /// Reported detail.
    pub message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Acknowledgement timestamp.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// One row of `server_actions`.
#[derive(Debug, Clone, FromRow)]
pub struct ServerActionRow {
    /// Row identifier.
    pub id: Uuid,
    /// Target server.
    pub server_id: Uuid,
    /// Action label (`upgrade`, `restart`, `rescan`).
    pub action: String,
    /// Action payload (e.g. target version).
    pub payload: Option<serde_json::Value>,
    /// Whether the site acknowledged execution.
    pub acknowledged: bool,
    /// Reported success flag.
    pub success: Option<bool>,
    /// Reported detail.
    pub message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Acknowledgement timestamp.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// One row of `announce_attempts`.
#[derive(Debug, Clone, FromRow)]
pub struct AnnounceAttemptRow {
    /// Row identifier.
    pub id: i64,
    /// Hex-encoded info hash.
    pub info_hash: String,
    /// Peer identifier as supplied.
    pub peer_id: String,
    /// Announcing IP.
    pub ip: String,
    /// Announcing port.
    pub port: i32,
    /// Announce event, when supplied.
    pub event: Option<String>,
    /// Outcome label (`ok`, `error`).
    pub status: String,
    /// Failure detail for refused announces.
    pub failure_reason: Option<String>,
    /// Timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_labels_round_trip() {
        for status in [
            TransferStatus::Queued,
            TransferStatus::Checking,
            TransferStatus::Downloading,
            TransferStatus::Paused,
            TransferStatus::Error,
            TransferStatus::Failed,
            TransferStatus::Cancelled,
            TransferStatus::Completed,
        ] {
            assert_eq!(TransferStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TransferStatus::parse("active").is_err());
    }

    #[test]
    fn fsm_matches_design_graph() {
        use TransferStatus as T;
        // Forward path.
        assert!(T::Checking.allowed_prior().contains(&T::Queued));
        assert!(T::Downloading.allowed_prior().contains(&T::Checking));
        assert!(T::Completed.allowed_prior().contains(&T::Downloading));
        // Pause loop.
        assert!(T::Paused.allowed_prior().contains(&T::Downloading));
        assert!(T::Downloading.allowed_prior().contains(&T::Paused));
        // Terminal states accept no further transitions.
        for target in [
            T::Queued,
            T::Checking,
            T::Downloading,
            T::Paused,
            T::Error,
            T::Failed,
        ] {
            assert!(!target.allowed_prior().contains(&T::Completed));
        }
        assert!(!T::Checking.allowed_prior().contains(&T::Cancelled));
        // Retry re-enters through queued only.
        assert!(T::Queued.allowed_prior().contains(&T::Error));
        assert!(T::Queued.allowed_prior().contains(&T::Cancelled));
        assert!(!T::Downloading.allowed_prior().contains(&T::Error));
    }

    #[test]
    fn queue_terminal_states_release_claims() {
        assert!(QueueStatus::Completed.releases_claim());
        assert!(QueueStatus::Failed.releases_claim());
        assert!(QueueStatus::Cancelled.releases_claim());
        assert!(!QueueStatus::Generating.releases_claim());
        assert!(!QueueStatus::Queued.releases_claim());
    }
}
