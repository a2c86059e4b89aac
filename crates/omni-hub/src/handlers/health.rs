//! Liveness endpoint.

use axum::{Json, extract::State};
use chrono::Utc;
use serde::Serialize;

use crate::state::SharedState;

/// `GET /api/v1/health` response body.
#[derive(Debug, Serialize)]
pub struct HealthBody {
    /// Always `ok` when the process answers.
    pub status: &'static str,
    /// Server time.
    pub time: chrono::DateTime<Utc>,
    /// Running version.
    pub version: String,
}

/// Report process liveness.
pub async fn health(State(state): State<SharedState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        time: Utc::now(),
        version: state.settings.version.clone(),
    })
}
