//! Command execution at the site: transfer control, content deletion,
//! and server actions.
//!
//! Commands arrive at least once (push plus poll replay), so every
//! handler is idempotent: pausing a paused transfer, deleting absent
//! content, and re-running a rescan are all clean no-ops.

use std::path::PathBuf;
use std::sync::Arc;

use omni_proto::{
    ActionDone, CommandResult, ContentCommand, ContentCommandAck, PendingTransfer, ServerAction,
    TransferCommand, TransferCommandAck, TransferCommandKind,
};
use omni_torrent::{InfoHash, PieceEngine, TorrentError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::HubClient;
use crate::error::SiteResult;
use crate::scanner::Scanner;

/// Executes hub commands against the local engine and filesystem.
pub struct Executor {
    client: HubClient,
    engine: Arc<dyn PieceEngine>,
    scanner: Arc<Scanner>,
    data_dir: PathBuf,
    restart: watch::Sender<bool>,
}

impl Executor {
    /// Assemble the executor.
    #[must_use]
    pub fn new(
        client: HubClient,
        engine: Arc<dyn PieceEngine>,
        scanner: Arc<Scanner>,
        data_dir: PathBuf,
        restart: watch::Sender<bool>,
    ) -> Self {
        Self {
            client,
            engine,
            scanner,
            data_dir,
            restart,
        }
    }

    /// Begin (or re-attach to) an assigned download. Loading an already
    /// loaded torrent is a refresh, so replays are harmless, and existing
    /// pieces on disk survive a cancel-without-delete and seed the resume.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob cannot be fetched or loaded.
    pub async fn handle_pending_transfer(&self, pending: PendingTransfer) -> SiteResult<()> {
        let blob = self.client.fetch_torrent_file(&pending.info_hash).await?;
        let hash = self.engine.load(&blob, &self.data_dir).await?;
        self.engine.start(&hash).await?;
        info!(
            transfer_id = %pending.transfer_id,
            info_hash = %pending.info_hash,
            "transfer started"
        );
        Ok(())
    }

    /// Execute one transfer command and ack it.
    ///
    /// # Errors
    ///
    /// Returns an error when the ack cannot be delivered; execution
    /// failures are reported inside the ack instead.
    pub async fn handle_transfer_command(&self, command: TransferCommand) -> SiteResult<()> {
        let (result, message) = self.run_transfer_command(&command).await;
        self.client
            .ack_transfer_command(&TransferCommandAck {
                transfer_id: command.transfer_id,
                result,
                message,
            })
            .await
    }

    async fn run_transfer_command(
        &self,
        command: &TransferCommand,
    ) -> (CommandResult, Option<String>) {
        let info_hash: InfoHash = match command.info_hash.parse() {
            Ok(hash) => hash,
            Err(err) => return (CommandResult::Error, Some(err.to_string())),
        };

        let outcome = match command.command {
            TransferCommandKind::Pause => self.engine.stop(&info_hash).await,
            TransferCommandKind::Resume => self.engine.start(&info_hash).await,
            TransferCommandKind::Cancel => {
                self.engine.remove(&info_hash, command.delete_data).await
            }
        };

        match outcome {
            Ok(()) => {
                info!(
                    transfer_id = %command.transfer_id,
                    command = ?command.command,
                    "transfer command executed"
                );
                (cancel_result(command), None)
            }
            // An unknown hash means the command was already executed (or
            // the torrent never loaded); with at-least-once delivery that
            // is a clean no-op, not a failure.
            Err(TorrentError::NotLoaded { .. }) => (cancel_result(command), None),
            Err(err) => {
                warn!(
                    transfer_id = %command.transfer_id,
                    error = %err,
                    "transfer command failed"
                );
                (CommandResult::Error, Some(err.to_string()))
            }
        }
    }

    /// Execute one content command (deletion) and ack it.
    ///
    /// # Errors
    ///
    /// Returns an error when the ack cannot be delivered.
    pub async fn handle_content_command(&self, command: ContentCommand) -> SiteResult<()> {
        let (result, message) = self.run_content_command(&command).await;
        self.client
            .ack_content_command(&ContentCommandAck {
                command_id: command.command_id,
                result,
                message,
            })
            .await
    }

    async fn run_content_command(
        &self,
        command: &ContentCommand,
    ) -> (CommandResult, Option<String>) {
        if command.action != "delete" {
            return (
                CommandResult::Error,
                Some(format!("unknown content action: {}", command.action)),
            );
        }

        let Some(package) = self.scanner.local_package(command.assetmap_uuid).await else {
            // Already gone: idempotent success.
            return (
                CommandResult::Deleted,
                Some("content already absent".to_string()),
            );
        };

        match remove_package_dir(&package.path) {
            Ok(()) => {
                info!(
                    assetmap = %command.assetmap_uuid,
                    path = %package.path.display(),
                    "package removed on hub command"
                );
                (CommandResult::Deleted, None)
            }
            Err(err) => (CommandResult::Error, Some(err)),
        }
    }

    /// Execute a server action and report completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the completion report cannot be delivered.
    pub async fn handle_action(&self, action: ServerAction) -> SiteResult<()> {
        match action {
            ServerAction::Restart => {
                self.client
                    .action_done(&ActionDone {
                        action: "restart".to_string(),
                        success: true,
                        message: None,
                    })
                    .await?;
                info!("restart requested; exiting after grace period");
                let restart = self.restart.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    let _ = restart.send(true);
                });
                Ok(())
            }
            ServerAction::Rescan => {
                let result = self.scanner.trigger_scan(&self.client).await;
                self.client
                    .action_done(&ActionDone {
                        action: "rescan".to_string(),
                        success: result.is_ok(),
                        message: result.err().map(|e| e.to_string()),
                    })
                    .await
            }
            ServerAction::Upgrade { version } => {
                // The binary fetch/swap lives in the upgrade collaborator;
                // without it the action is reported as failed so the hub's
                // bookkeeping reflects reality.
                warn!(version = %version, "upgrade requested but no upgrade collaborator is present");
                self.client
                    .action_done(&ActionDone {
                        action: "upgrade".to_string(),
                        success: false,
                        message: Some("upgrade collaborator unavailable".to_string()),
                    })
                    .await
            }
        }
    }
}

const fn cancel_result(command: &TransferCommand) -> CommandResult {
    match command.command {
        TransferCommandKind::Cancel => {
            if command.delete_data {
                CommandResult::Deleted
            } else {
                CommandResult::Kept
            }
        }
        TransferCommandKind::Pause | TransferCommandKind::Resume => CommandResult::Done,
    }
}

fn remove_package_dir(path: &PathBuf) -> Result<(), String> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(format!("failed to remove {}: {err}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn command(kind: TransferCommandKind, delete_data: bool) -> TransferCommand {
        TransferCommand {
            transfer_id: Uuid::new_v4(),
            info_hash: "aa".repeat(20),
            command: kind,
            delete_data,
        }
    }

    #[test]
    fn ack_results_reflect_cancel_semantics() {
        assert_eq!(
            cancel_result(&command(TransferCommandKind::Cancel, true)),
            CommandResult::Deleted
        );
        assert_eq!(
            cancel_result(&command(TransferCommandKind::Cancel, false)),
            CommandResult::Kept
        );
        assert_eq!(
            cancel_result(&command(TransferCommandKind::Pause, false)),
            CommandResult::Done
        );
    }
}
