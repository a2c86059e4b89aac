//! Background reaper for stuck torrent generations.

use std::time::Duration;

use omni_data::Store;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A `generating` row untouched for this long is considered stalled.
pub const STALL_AFTER: Duration = Duration::from_secs(3 * 60 * 60);

/// How often the reaper sweeps.
const SWEEP_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Spawn the stall reaper: flips stale `generating` rows to
/// `failed/"stalled"` and releases their claims so another site can take
/// over.
pub fn spawn_generation_reaper(store: Store) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_PERIOD);
        loop {
            tick.tick().await;
            match store.queue().reap_stalled(STALL_AFTER.as_secs_f64()).await {
                Ok(reaped) if !reaped.is_empty() => {
                    for (package_id, server_id) in &reaped {
                        info!(
                            package_id = %package_id,
                            server_id = %server_id,
                            "stalled generation failed and claim released"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "generation reaper sweep failed"),
            }
        }
    })
}
