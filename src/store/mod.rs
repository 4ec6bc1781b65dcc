//! Telemetry storage
//!
//! Two logical stores share one backend:
//! - **Latest state**: one overwrite-on-write snapshot per subject, read by
//!   the live dashboard.
//! - **History log**: per-subject snapshots keyed by sanitized timestamp,
//!   read as a bounded most-recent window for time travel.
//!
//! Backends are injected as `Arc<dyn TelemetryStore>` through `AppState`.

use std::time::Duration;

use crate::models::{HistoryEntry, TelemetryRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgTelemetryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call exceeded {0:?}")]
    Timeout(Duration),

    #[error("latest state updated for '{subject_id}' but history append failed: {source}")]
    PartialWrite {
        subject_id: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed overwrite store holding the current snapshot of each subject
#[axum::async_trait]
pub trait LatestStateStore: Send + Sync {
    /// Overwrite the subject's entry. Last physical write wins.
    async fn put(&self, record: &TelemetryRecord) -> StoreResult<()>;

    async fn get(&self, subject_id: &str) -> StoreResult<Option<TelemetryRecord>>;

    /// Every subject's current snapshot, in no particular order
    async fn list_all(&self) -> StoreResult<Vec<TelemetryRecord>>;

    /// Up to `limit` snapshots with subject id strictly after `after`,
    /// ordered by subject id
    async fn list_page(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<TelemetryRecord>>;

    async fn delete(&self, subject_id: &str) -> StoreResult<bool>;
}

/// Per-subject history of past snapshots
#[axum::async_trait]
pub trait HistoryLog: Send + Sync {
    /// Insert keyed by `entry.key`, overwriting an existing entry with the
    /// same key.
    async fn append(&self, subject_id: &str, entry: &HistoryEntry) -> StoreResult<()>;

    /// The newest `limit` entries, returned oldest-first
    async fn window(&self, subject_id: &str, limit: usize) -> StoreResult<Vec<TelemetryRecord>>;

    /// Drop a subject's whole history, returning the number of entries removed
    async fn remove_subject(&self, subject_id: &str) -> StoreResult<u64>;
}

#[axum::async_trait]
pub trait TelemetryStore: LatestStateStore + HistoryLog {
    /// Write a snapshot to the latest state, then append it to history.
    ///
    /// The two writes are not atomic here. Backends with transactions
    /// override this.
    async fn record_snapshot(&self, record: &TelemetryRecord, entry: &HistoryEntry) -> StoreResult<()> {
        self.put(record).await?;

        if let Err(e) = self.append(&record.subject_id, entry).await {
            tracing::error!(
                target: "telemetry::partial_write",
                subject_id = %record.subject_id,
                history_key = %entry.key,
                "History append failed after latest-state write: {}", e
            );
            return Err(StoreError::PartialWrite {
                subject_id: record.subject_id.clone(),
                source: Box::new(e),
            });
        }

        Ok(())
    }

    /// Remove a subject from both stores. Returns whether a latest-state
    /// entry existed.
    async fn purge_subject(&self, subject_id: &str) -> StoreResult<bool> {
        let existed = self.delete(subject_id).await?;
        let history = self.remove_subject(subject_id).await?;
        tracing::debug!("Purged subject '{}' ({} history entries)", subject_id, history);
        Ok(existed)
    }

    /// Release backend resources at shutdown
    async fn close(&self) {}
}
