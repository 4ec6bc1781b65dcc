//! In-memory telemetry store
//!
//! Backs local runs (`STORE_BACKEND=memory`) and the test suite. Failure
//! and latency injection hooks mirror what a flaky remote store does.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use super::{HistoryLog, LatestStateStore, StoreError, StoreResult, TelemetryStore};
use crate::models::{HistoryEntry, TelemetryRecord};

#[derive(Default)]
pub struct MemoryStore {
    latest: RwLock<HashMap<String, TelemetryRecord>>,
    /// subject -> history key -> entry
    history: RwLock<HashMap<String, BTreeMap<String, HistoryEntry>>>,
    fail_history: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    #[cfg(test)]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make subsequent history appends fail
    #[cfg(test)]
    pub fn fail_history_appends(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    /// Total history entries stored for a subject, ignoring the read cap
    #[cfg(test)]
    pub async fn history_len(&self, subject_id: &str) -> usize {
        self.history
            .read()
            .await
            .get(subject_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[axum::async_trait]
impl LatestStateStore for MemoryStore {
    async fn put(&self, record: &TelemetryRecord) -> StoreResult<()> {
        self.simulate_latency().await;
        self.latest
            .write()
            .await
            .insert(record.subject_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, subject_id: &str) -> StoreResult<Option<TelemetryRecord>> {
        self.simulate_latency().await;
        Ok(self.latest.read().await.get(subject_id).cloned())
    }

    async fn list_all(&self) -> StoreResult<Vec<TelemetryRecord>> {
        self.simulate_latency().await;
        Ok(self.latest.read().await.values().cloned().collect())
    }

    async fn list_page(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<TelemetryRecord>> {
        self.simulate_latency().await;
        let latest = self.latest.read().await;
        let mut subjects: Vec<&String> = latest
            .keys()
            .filter(|id| after.map_or(true, |a| id.as_str() > a))
            .collect();
        subjects.sort();

        Ok(subjects
            .into_iter()
            .take(limit)
            .filter_map(|id| latest.get(id).cloned())
            .collect())
    }

    async fn delete(&self, subject_id: &str) -> StoreResult<bool> {
        self.simulate_latency().await;
        Ok(self.latest.write().await.remove(subject_id).is_some())
    }
}

#[axum::async_trait]
impl HistoryLog for MemoryStore {
    async fn append(&self, subject_id: &str, entry: &HistoryEntry) -> StoreResult<()> {
        self.simulate_latency().await;
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("history log rejected write".to_string()));
        }

        self.history
            .write()
            .await
            .entry(subject_id.to_string())
            .or_default()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn window(&self, subject_id: &str, limit: usize) -> StoreResult<Vec<TelemetryRecord>> {
        self.simulate_latency().await;
        let history = self.history.read().await;
        let Some(entries) = history.get(subject_id) else {
            return Ok(Vec::new());
        };

        let mut newest_first: Vec<&HistoryEntry> = entries.values().collect();
        newest_first.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        newest_first.truncate(limit);

        Ok(newest_first
            .into_iter()
            .rev()
            .map(|entry| entry.record.clone())
            .collect())
    }

    async fn remove_subject(&self, subject_id: &str) -> StoreResult<u64> {
        self.simulate_latency().await;
        Ok(self
            .history
            .write()
            .await
            .remove(subject_id)
            .map(|entries| entries.len() as u64)
            .unwrap_or(0))
    }
}

#[axum::async_trait]
impl TelemetryStore for MemoryStore {}
