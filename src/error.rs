//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Auth errors
    Unauthorized,
    Forbidden,

    // Resource errors
    NotFound(String),

    // Validation errors
    ValidationError(String),

    // Store errors
    StoreUnavailable(String),
    PartialWriteFailure(String),

    // Generic errors
    InternalError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::StoreUnavailable(_)
            | AppError::PartialWriteFailure(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Unauthorized => write!(f, "Authentication required"),
            AppError::Forbidden => write!(f, "Access denied"),
            AppError::NotFound(msg)
            | AppError::ValidationError(msg)
            | AppError::StoreUnavailable(msg)
            | AppError::PartialWriteFailure(msg)
            | AppError::InternalError(msg) => write!(f, "{}", msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Unauthorized
            | AppError::Forbidden
            | AppError::NotFound(_)
            | AppError::ValidationError(_) => self.to_string(),
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store error: {}", msg);
                "Telemetry store unavailable".to_string()
            }
            AppError::PartialWriteFailure(msg) => {
                tracing::error!("Partial write: {}", msg);
                "Snapshot saved to latest state but not to history".to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "status": "error",
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PartialWrite { .. } => AppError::PartialWriteFailure(err.to_string()),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                AppError::StoreUnavailable(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_store_errors_map_to_categories() {
        let timeout = AppError::from(StoreError::Timeout(Duration::from_millis(5)));
        assert!(matches!(timeout, AppError::StoreUnavailable(_)));

        let down = AppError::from(StoreError::Unavailable("pool closed".to_string()));
        assert!(matches!(down, AppError::StoreUnavailable(_)));

        let partial = AppError::from(StoreError::PartialWrite {
            subject_id: "u1".to_string(),
            source: Box::new(StoreError::Unavailable("history down".to_string())),
        });
        assert!(matches!(partial, AppError::PartialWriteFailure(ref msg) if msg.contains("u1")));
        assert_eq!(partial.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
