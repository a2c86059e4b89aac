//! Bulk inventory ingestion from site scans.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use omni_proto::InventoryReport;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AuthedServer, ensure_self};
use crate::errors::ApiResult;
use crate::state::SharedState;

/// Counters returned after an inventory ingest.
#[derive(Debug, Default, Serialize)]
pub struct InventoryOutcome {
    /// New or refreshed package rows.
    pub packages_upserted: usize,
    /// Inventory rows written.
    pub items_upserted: usize,
    /// Previously known packages flipped to offline.
    pub marked_offline: u64,
    /// Items dropped for data-integrity reasons.
    pub dropped: usize,
}

/// `POST /servers/{id}/inventory`: bulk upsert of a scan result.
pub async fn ingest(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(report): Json<InventoryReport>,
) -> ApiResult<Json<InventoryOutcome>> {
    ensure_self(&authed, id)?;
    let mut outcome = InventoryOutcome::default();

    // Package metadata first: items may reference packages the hub has
    // never seen before this report.
    for descriptor in &report.packages {
        state.store.packages().upsert(descriptor).await?;
        outcome.packages_upserted += 1;
    }

    let mut present = Vec::with_capacity(report.items.len());
    for item in &report.items {
        let Some(package) = state
            .store
            .packages()
            .find_by_assetmap(item.assetmap_uuid)
            .await?
        else {
            warn!(
                server_id = %id,
                assetmap = %item.assetmap_uuid,
                "inventory row references unknown package; dropped"
            );
            outcome.dropped += 1;
            continue;
        };
        state
            .store
            .inventory()
            .upsert(id, package.id, &item.local_path, item.status)
            .await?;
        present.push(package.id);
        outcome.items_upserted += 1;
    }

    outcome.marked_offline = state
        .store
        .inventory()
        .mark_missing_offline(id, &present)
        .await?;

    debug!(
        server_id = %id,
        items = outcome.items_upserted,
        packages = outcome.packages_upserted,
        offline = outcome.marked_offline,
        "inventory ingested"
    );
    Ok(Json(outcome))
}
