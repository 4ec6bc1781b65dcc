//! Ingestion service

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::with_timeout;
use crate::models::{HistoryEntry, IngestReceipt, TelemetryPayload};
use crate::store::TelemetryStore;
use crate::AppResult;

/// Validates producer payloads and writes them to latest state and history
#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn TelemetryStore>,
    default_subject_id: Option<String>,
    timeout: Duration,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        default_subject_id: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            default_subject_id,
            timeout,
        }
    }

    /// Ingest one raw snapshot body.
    ///
    /// Store errors are returned to the caller as-is; the agent's polling
    /// loop is the only retry.
    pub async fn ingest(&self, raw: &[u8]) -> AppResult<IngestReceipt> {
        let record = TelemetryPayload::from_slice(raw)?
            .into_record(self.default_subject_id.as_deref())?;

        let entry = HistoryEntry::for_record(&record, Utc::now());

        with_timeout(self.timeout, self.store.record_snapshot(&record, &entry)).await?;

        tracing::debug!(
            "Telemetry saved for '{}' (history key {})",
            record.subject_id,
            entry.key
        );

        Ok(IngestReceipt {
            subject_id: record.subject_id,
            history_key: entry.key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HistoryLog, LatestStateStore, MemoryStore};
    use crate::AppError;
    use serde_json::json;

    fn service(store: Arc<MemoryStore>, fallback: Option<&str>) -> IngestService {
        IngestService::new(store, fallback.map(str::to_string), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_ingest_writes_both_stores() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), None);

        let body = json!({
            "subject_id": "u1",
            "timestamp": "2026-01-28T12:00:00Z",
            "ai_risk": 0.2,
            "forensic": {"activeApp": "Code.exe"}
        });
        let receipt = tokio_test::assert_ok!(svc.ingest(body.to_string().as_bytes()).await);

        assert_eq!(receipt.subject_id, "u1");
        assert_eq!(receipt.history_key, "2026-01-28T12-00-00Z");

        let latest = store.get("u1").await.unwrap().unwrap();
        assert_eq!(serde_json::to_value(&latest).unwrap(), body);
        assert_eq!(store.window("u1", 50).await.unwrap(), vec![latest]);
    }

    #[tokio::test]
    async fn test_reingest_identical_record_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), None);
        let body = br#"{"subject_id": "u1", "timestamp": "2026-01-28T12:00:00Z", "ai_risk": 0.5}"#;

        svc.ingest(body).await.unwrap();
        let before = store.get("u1").await.unwrap();
        svc.ingest(body).await.unwrap();

        assert_eq!(store.get("u1").await.unwrap(), before);
        assert_eq!(store.history_len("u1").await, 1);
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_stamped_for_history_only() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), None);

        let receipt = svc.ingest(br#"{"subject_id": "u1"}"#).await.unwrap();

        assert!(receipt.history_key.ends_with('Z'));
        assert!(!receipt.history_key.contains(':'));
        assert!(store.get("u1").await.unwrap().unwrap().timestamp.is_none());
        let history = store.window("u1", 50).await.unwrap();
        assert!(history[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_fallback_subject_collides() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), Some("user_001"));

        svc.ingest(br#"{"timestamp": "T1", "ai_risk": 0.1}"#).await.unwrap();
        svc.ingest(br#"{"timestamp": "T2", "ai_risk": 0.8}"#).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subject_id, "user_001");
        assert_eq!(all[0].ai_risk, Some(0.8));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_validation_error() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), None);

        let err = svc.ingest(br#"{"ai_risk": 0.1}"#).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        let err = svc.ingest(br#"{"subject_id": ""}"#).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_failure_surfaces_as_partial_write() {
        let store = Arc::new(MemoryStore::new());
        store.fail_history_appends(true);
        let svc = service(store.clone(), None);

        let err = svc
            .ingest(br#"{"subject_id": "u1", "timestamp": "T1"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PartialWriteFailure(_)));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(500)));
        let svc = IngestService::new(store, None, Duration::from_millis(20));

        let err = tokio_test::assert_err!(svc.ingest(br#"{"subject_id": "u1", "timestamp": "T1"}"#).await);
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }
}
