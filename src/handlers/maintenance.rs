//! Retention maintenance handler

use axum::{extract::State, Json};

use crate::models::ApiResponse;
use crate::{AppResult, AppState};

/// Run the configured purge policy
pub async fn purge(State(state): State<AppState>) -> AppResult<Json<ApiResponse<()>>> {
    let report = state.maintenance.purge().await?;

    tracing::info!("Purge removed {} of {} scanned records", report.purged, report.scanned);

    Ok(Json(ApiResponse::message(format!("Purged {} records", report.purged))))
}
