//! Authentication middleware
//!
//! Session and account policy live outside this service. Routes that the
//! dashboard treats as privileged (history, export, purge) only check a
//! shared bearer token here.

use axum::{
    extract::{State, Request},
    middleware::Next,
    response::Response,
    http::header::AUTHORIZATION,
};
use sha2::{Sha256, Digest};

use crate::{AppState, AppError};

/// Middleware: Require the admin bearer token
pub async fn require_admin_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;

    // Compare digests rather than raw secrets
    if hash_token(&token) != hash_token(&state.config.admin_token) {
        tracing::warn!("Rejected admin request to {} with invalid token", req.uri().path());
        return Err(AppError::Forbidden);
    }

    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req.headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)
}

fn hash_token(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}
