//! Telemetry ingest and read handlers

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::models::{ApiResponse, TelemetryRecord};
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// Ingest one snapshot from a capture agent
pub async fn ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<ApiResponse<()>>> {
    let receipt = state.ingest.ingest(&body).await?;

    tracing::info!(
        "Telemetry ingested for '{}' ({})",
        receipt.subject_id,
        receipt.history_key
    );

    Ok(Json(ApiResponse::saved()))
}

/// Latest snapshot of every subject (live dashboard)
pub async fn list_latest(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<TelemetryRecord>>>> {
    let records = state.query.list_latest().await?;
    Ok(Json(ApiResponse::success(records)))
}

/// Latest snapshot of a single subject
pub async fn get_latest(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<Json<ApiResponse<TelemetryRecord>>> {
    let record = state.query.get_latest(&subject_id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Time-travel window for one subject, oldest-first
pub async fn history(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Vec<TelemetryRecord>>>> {
    let Query(params) = params.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let history = state.query.get_history(&subject_id, params.limit).await?;
    Ok(Json(ApiResponse::success(history)))
}
