//! Status-report ingestion endpoint.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use omni_proto::StatusReport;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{AuthedServer, ensure_self};
use crate::errors::ApiResult;
use crate::reconcile;
use crate::state::SharedState;

/// Response body summarizing the absorbed report.
#[derive(Debug, Serialize)]
pub struct ReportOutcome {
    /// Queue rows upserted.
    pub queue_rows: usize,
    /// Seeder rows upserted.
    pub seeders: usize,
    /// Transfers touched.
    pub transfers_touched: usize,
    /// Items dropped for integrity reasons.
    pub dropped: usize,
}

/// `POST /servers/{id}/torrent-status`: the reconciler entry point.
pub async fn ingest(
    State(state): State<SharedState>,
    Extension(authed): Extension<AuthedServer>,
    Path(id): Path<Uuid>,
    Json(report): Json<StatusReport>,
) -> ApiResult<Json<ReportOutcome>> {
    ensure_self(&authed, id)?;

    let summary = reconcile::apply_report(&state.store, &authed.0, &report).await?;
    // A report is also a sign of life.
    state.store.servers().heartbeat(id, None, None, None).await?;

    debug!(
        server_id = %id,
        queue_rows = summary.queue_rows,
        seeders = summary.seeders,
        transfers = summary.transfers_touched,
        dropped = summary.dropped,
        "status report absorbed"
    );
    Ok(Json(ReportOutcome {
        queue_rows: summary.queue_rows,
        seeders: summary.seeders,
        transfers_touched: summary.transfers_touched,
        dropped: summary.dropped,
    }))
}
