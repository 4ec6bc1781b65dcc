//! Dashboard read paths: live view and time travel

use std::sync::Arc;
use std::time::Duration;

use super::with_timeout;
use crate::config::MAX_HISTORY_WINDOW;
use crate::models::TelemetryRecord;
use crate::store::TelemetryStore;
use crate::{AppError, AppResult};

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn TelemetryStore>,
    history_limit: usize,
    timeout: Duration,
}

impl QueryService {
    pub fn new(store: Arc<dyn TelemetryStore>, history_limit: usize, timeout: Duration) -> Self {
        Self {
            store,
            history_limit: history_limit.clamp(1, MAX_HISTORY_WINDOW),
            timeout,
        }
    }

    /// Current snapshot of every subject, unpaginated
    pub async fn list_latest(&self) -> AppResult<Vec<TelemetryRecord>> {
        Ok(with_timeout(self.timeout, self.store.list_all()).await?)
    }

    pub async fn get_latest(&self, subject_id: &str) -> AppResult<TelemetryRecord> {
        with_timeout(self.timeout, self.store.get(subject_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No telemetry for subject '{}'", subject_id)))
    }

    /// Time-travel window for one subject, oldest-first.
    ///
    /// `limit` narrows the configured window but never widens it past
    /// `MAX_HISTORY_WINDOW`.
    pub async fn get_history(&self, subject_id: &str, limit: Option<usize>) -> AppResult<Vec<TelemetryRecord>> {
        let limit = limit
            .unwrap_or(self.history_limit)
            .clamp(1, MAX_HISTORY_WINDOW);

        let history = with_timeout(self.timeout, self.store.window(subject_id, limit)).await?;

        if history.is_empty() && with_timeout(self.timeout, self.store.get(subject_id)).await?.is_none() {
            return Err(AppError::NotFound(format!("No history for subject '{}'", subject_id)));
        }

        Ok(history)
    }
}
