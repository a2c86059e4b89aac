//! The hub-side reconciler: absorbs site status reports into the
//! authoritative tables.
//!
//! Every mutation here is an idempotent upsert or a guarded transition, so
//! replaying a report converges to the same state and a mid-report failure
//! is healed by the next report (sites post every ~10 s).

use omni_data::{DataError, SeederStatus, ServerRow, Store, TransferStatus};
use omni_proto::{StatusReport, TorrentActivity, TorrentStatusItem};
use tracing::{debug, warn};

/// Counters summarizing one absorbed report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportSummary {
    /// Queue rows upserted.
    pub queue_rows: usize,
    /// Seeder rows upserted.
    pub seeders: usize,
    /// Transfers that received progress or state changes.
    pub transfers_touched: usize,
    /// Items dropped for data-integrity reasons (unknown package, bad
    /// status label).
    pub dropped: usize,
}

/// Absorb one report from `server`.
///
/// # Errors
///
/// Returns an error only for infrastructure failures; per-item integrity
/// problems are logged, counted, and skipped.
pub async fn apply_report(
    store: &Store,
    server: &ServerRow,
    report: &StatusReport,
) -> Result<ReportSummary, DataError> {
    let mut summary = ReportSummary::default();

    if report.is_full_sync {
        store.queue().delete_for_server(server.id).await?;
        debug!(server_id = %server.id, "full sync: queue rows replaced");
    }

    for item in &report.queue_items {
        let Some(package) = store
            .packages()
            .find_by_assetmap(item.assetmap_uuid)
            .await?
        else {
            warn!(
                server_id = %server.id,
                assetmap = %item.assetmap_uuid,
                "queue item references unknown package; dropped"
            );
            summary.dropped += 1;
            continue;
        };
        match store.queue().upsert_report(server.id, package.id, item).await {
            Ok(()) => summary.queue_rows += 1,
            Err(DataError::UnknownStatus { value }) => {
                warn!(
                    server_id = %server.id,
                    status = %value,
                    "queue item carried unknown status; dropped"
                );
                summary.dropped += 1;
            }
            Err(err) => return Err(err),
        }
    }

    for item in &report.torrents {
        apply_torrent_item(store, server, item, &mut summary).await?;
    }

    if report.is_behind_nat.is_some() || report.relay_registered.is_some() {
        store
            .servers()
            .set_nat_state(server.id, report.is_behind_nat, report.relay_registered)
            .await?;
    }

    Ok(summary)
}

async fn apply_torrent_item(
    store: &Store,
    server: &ServerRow,
    item: &TorrentStatusItem,
    summary: &mut ReportSummary,
) -> Result<(), DataError> {
    // The stats table records every figure set verbatim.
    store.stats().upsert(server.id, item).await?;

    let torrent = store.torrents().find_by_info_hash(&item.info_hash).await?;

    match item.status {
        TorrentActivity::Seeding | TorrentActivity::Completed => {
            if let Some(torrent) = &torrent {
                let status = if item.status == TorrentActivity::Seeding {
                    SeederStatus::Seeding
                } else {
                    SeederStatus::Completed
                };
                store
                    .seeders()
                    .upsert(
                        torrent.id,
                        server.id,
                        status,
                        i64::try_from(item.uploaded_bytes).unwrap_or(i64::MAX),
                    )
                    .await?;
                summary.seeders += 1;
            } else {
                warn!(
                    server_id = %server.id,
                    info_hash = %item.info_hash,
                    "seeder report for unknown torrent; dropped"
                );
                summary.dropped += 1;
            }

            // A completed download also finishes the matching transfer.
            if item.status == TorrentActivity::Completed && item.progress_percent >= 100.0 {
                complete_matching_transfer(store, server, item, summary).await?;
            }
        }
        TorrentActivity::Downloading | TorrentActivity::Verifying | TorrentActivity::Checking => {
            if let Some(transfer) = store
                .transfers()
                .find_active_for(server.id, &item.info_hash)
                .await?
            {
                store
                    .transfers()
                    .apply_progress(
                        transfer.id,
                        item.progress_percent,
                        i64::try_from(item.bytes_completed).unwrap_or(i64::MAX),
                        i64::try_from(item.bytes_total).unwrap_or(i64::MAX),
                        i64::try_from(item.download_speed_bps).unwrap_or(i64::MAX),
                        i64::try_from(item.upload_speed_bps).unwrap_or(i64::MAX),
                        i32::try_from(item.peers_connected).unwrap_or(i32::MAX),
                        item.eta_seconds.and_then(|eta| i64::try_from(eta).ok()),
                    )
                    .await?;
                summary.transfers_touched += 1;
            }
        }
        TorrentActivity::Paused => {
            transition_matching_transfer(store, server, item, TransferStatus::Paused, None, summary)
                .await?;
        }
        TorrentActivity::Error => {
            transition_matching_transfer(
                store,
                server,
                item,
                TransferStatus::Error,
                item.error_message.as_deref(),
                summary,
            )
            .await?;
        }
        TorrentActivity::Queued | TorrentActivity::Stopped => {}
    }

    Ok(())
}

async fn complete_matching_transfer(
    store: &Store,
    server: &ServerRow,
    item: &TorrentStatusItem,
    summary: &mut ReportSummary,
) -> Result<(), DataError> {
    transition_matching_transfer(
        store,
        server,
        item,
        TransferStatus::Completed,
        None,
        summary,
    )
    .await
}

async fn transition_matching_transfer(
    store: &Store,
    server: &ServerRow,
    item: &TorrentStatusItem,
    target: TransferStatus,
    message: Option<&str>,
    summary: &mut ReportSummary,
) -> Result<(), DataError> {
    let Some(transfer) = store
        .transfers()
        .find_active_for(server.id, &item.info_hash)
        .await?
    else {
        return Ok(());
    };
    match store.transfers().transition(transfer.id, target, message).await {
        Ok(()) => summary.transfers_touched += 1,
        // Guarded transition refused: the report raced another writer.
        Err(DataError::Conflict { .. }) => {}
        Err(err) => return Err(err),
    }
    Ok(())
}
