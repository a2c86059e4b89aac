//! The periodic status reporter: one report to the hub every ~10 s.

use std::sync::Arc;

use chrono::Utc;
use omni_proto::StatusReport;
use omni_torrent::PieceEngine;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::HubClient;
use crate::generator::QueueState;

/// Report cadence.
const REPORT_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);

/// Spawn the report loop. The first report after any delivery failure is
/// flagged `is_full_sync` so the hub rebuilds this site's queue rows from
/// scratch after an outage.
pub fn spawn_reporter(
    client: HubClient,
    engine: Arc<dyn PieceEngine>,
    queue_state: Arc<QueueState>,
    cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REPORT_PERIOD);
        // The very first report is a full sync: the hub's queue rows for
        // this site may be stale from a previous run.
        let mut need_full_sync = true;
        loop {
            tick.tick().await;
            if *cancel.borrow() {
                break;
            }

            let report = StatusReport {
                timestamp: Utc::now(),
                is_full_sync: need_full_sync,
                is_behind_nat: None,
                relay_registered: None,
                torrents: engine.stats().await,
                queue_items: queue_state.snapshot().await,
                queue_stats: None,
            };

            match client.post_report(&report).await {
                Ok(()) => {
                    debug!(
                        torrents = report.torrents.len(),
                        queue_items = report.queue_items.len(),
                        full_sync = report.is_full_sync,
                        "status report delivered"
                    );
                    need_full_sync = false;
                }
                Err(err) => {
                    warn!(error = %err, "status report failed; next delivery will full-sync");
                    need_full_sync = true;
                }
            }
        }
    })
}
