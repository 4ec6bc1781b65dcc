//! Telemetry services built on top of the store traits

use std::future::Future;
use std::time::Duration;

use crate::store::{StoreError, StoreResult};

pub mod ingest;
pub mod maintenance;
pub mod query;

pub use ingest::IngestService;
pub use maintenance::MaintenanceService;
pub use query::QueryService;

/// Bound a store call so a stalled backend surfaces as an error
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
