//! Export handlers (CSV and JSON backup attachments)

use axum::{
    extract::State,
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::IntoResponse,
};
use chrono::Utc;

use crate::{AppResult, AppState};

/// Latest state of every subject as a CSV attachment
pub async fn csv(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let body = state.maintenance.export_csv().await?;
    let filename = format!(
        "attachment; filename=\"telemetry_logs_{}.csv\"",
        Utc::now().format("%Y%m%d_%H%M%S")
    );

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (CONTENT_DISPOSITION, filename),
        ],
        body,
    ))
}

/// Point-in-time dump of the latest state, keyed by subject id
pub async fn backup(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let backup = state.maintenance.export_backup().await?;
    let body = serde_json::to_string_pretty(&backup)?;
    let filename = format!(
        "attachment; filename=\"telemetry_backup_{}.json\"",
        Utc::now().format("%Y%m%d")
    );

    Ok((
        [
            (CONTENT_TYPE, "application/json".to_string()),
            (CONTENT_DISPOSITION, filename),
        ],
        body,
    ))
}
