//! Export and retention maintenance over the latest-state set

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::with_timeout;
use crate::config::PurgePolicy;
use crate::models::{PurgeReport, TelemetryRecord};
use crate::store::TelemetryStore;
use crate::AppResult;

/// CSV header, one column per exported field
pub const CSV_HEADER: &str = "User ID,Timestamp,App,Window Title,AI Risk Score,WPM";

const MISSING_TEXT: &str = "N/A";
const MISSING_NUMBER: &str = "0";

#[derive(Clone)]
pub struct MaintenanceService {
    store: Arc<dyn TelemetryStore>,
    purge_policy: PurgePolicy,
    timeout: Duration,
}

impl MaintenanceService {
    pub fn new(store: Arc<dyn TelemetryStore>, purge_policy: PurgePolicy, timeout: Duration) -> Self {
        Self {
            store,
            purge_policy,
            timeout,
        }
    }

    /// One CSV row per subject, newest snapshot first
    pub async fn export_csv(&self) -> AppResult<String> {
        let mut records = with_timeout(self.timeout, self.store.list_all()).await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut out = String::with_capacity(64 * (records.len() + 1));
        out.push_str(CSV_HEADER);
        out.push_str("\r\n");

        for record in &records {
            let row = [
                csv_field(&record.subject_id),
                csv_field(record.timestamp.as_deref().unwrap_or(MISSING_TEXT)),
                csv_field(&text_or(record.forensic_field("activeApp"), MISSING_TEXT)),
                csv_field(&text_or(record.forensic_field("activeWindow"), MISSING_TEXT)),
                record.ai_risk.map(|r| r.to_string()).unwrap_or_else(|| MISSING_NUMBER.to_string()),
                csv_field(&text_or(record.behavior_field("wpm"), MISSING_NUMBER)),
            ];
            out.push_str(&row.join(","));
            out.push_str("\r\n");
        }

        tracing::info!("Exported {} telemetry rows to CSV", records.len());
        Ok(out)
    }

    /// Every latest-state record keyed by subject id
    pub async fn export_backup(&self) -> AppResult<BTreeMap<String, TelemetryRecord>> {
        let records = with_timeout(self.timeout, self.store.list_all()).await?;
        let backup: BTreeMap<_, _> = records
            .into_iter()
            .map(|r| (r.subject_id.clone(), r))
            .collect();

        tracing::info!("Built backup of {} subjects", backup.len());
        Ok(backup)
    }

    /// Apply the configured retention policy
    pub async fn purge(&self) -> AppResult<PurgeReport> {
        let report = match &self.purge_policy {
            PurgePolicy::Marker {
                subject_marker,
                marker,
                batch_size,
            } => self.purge_marked(subject_marker, marker, *batch_size).await?,
            PurgePolicy::Age { retention, page_size } => {
                self.purge_older_than(Utc::now() - *retention, *page_size).await?
            }
        };

        tracing::info!(
            "Purge finished: {} scanned, {} purged",
            report.scanned,
            report.purged
        );
        Ok(report)
    }

    /// Delete subjects in the first `batch_size` entries whose id contains
    /// both `subject_marker` (exact case) and `marker` (ignoring case)
    async fn purge_marked(
        &self,
        subject_marker: &str,
        marker: &str,
        batch_size: usize,
    ) -> AppResult<PurgeReport> {
        let batch = with_timeout(self.timeout, self.store.list_page(None, batch_size)).await?;
        let marker = marker.to_lowercase();

        let mut report = PurgeReport {
            scanned: batch.len(),
            purged: 0,
        };

        if marker.is_empty() || subject_marker.is_empty() {
            return Ok(report);
        }

        for record in batch.iter().filter(|r| {
            r.subject_id.contains(subject_marker) && r.subject_id.to_lowercase().contains(&marker)
        }) {
            if with_timeout(self.timeout, self.store.purge_subject(&record.subject_id)).await? {
                report.purged += 1;
            }
        }

        Ok(report)
    }

    /// Sweep every subject page by page, deleting those whose latest
    /// timestamp is before `cutoff`. Missing or unparseable timestamps are
    /// kept.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>, page_size: usize) -> AppResult<PurgeReport> {
        let page_size = page_size.max(1);
        let mut report = PurgeReport::default();
        let mut after: Option<String> = None;

        loop {
            let page = with_timeout(
                self.timeout,
                self.store.list_page(after.as_deref(), page_size),
            )
            .await?;

            let Some(last) = page.last() else { break };
            after = Some(last.subject_id.clone());
            report.scanned += page.len();

            for record in &page {
                match record.parsed_timestamp() {
                    Some(ts) if ts < cutoff => {
                        if with_timeout(self.timeout, self.store.purge_subject(&record.subject_id)).await? {
                            report.purged += 1;
                        }
                    }
                    Some(_) => {}
                    None => tracing::debug!(
                        "Keeping '{}': timestamp missing or unparseable",
                        record.subject_id
                    ),
                }
            }

            if page.len() < page_size {
                break;
            }
        }

        Ok(report)
    }
}

fn text_or(value: Option<&Value>, missing: &str) -> String {
    match value {
        None | Some(Value::Null) => missing.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::IngestService;
    use crate::store::{LatestStateStore, MemoryStore};
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(200);

    async fn seeded(policy: PurgePolicy, bodies: &[Value]) -> (Arc<MemoryStore>, MaintenanceService) {
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestService::new(store.clone(), None, TIMEOUT);
        for body in bodies {
            ingest.ingest(body.to_string().as_bytes()).await.unwrap();
        }
        let svc = MaintenanceService::new(store.clone(), policy, TIMEOUT);
        (store, svc)
    }

    fn marker_policy() -> PurgePolicy {
        marker_policy_with_batch(50)
    }

    fn marker_policy_with_batch(batch_size: usize) -> PurgePolicy {
        PurgePolicy::Marker {
            subject_marker: "user".to_string(),
            marker: "test".to_string(),
            batch_size,
        }
    }

    #[tokio::test]
    async fn test_csv_one_row_per_subject_with_sentinels() {
        let (_, svc) = seeded(
            marker_policy(),
            &[
                json!({"subject_id": "u1", "timestamp": "2026-01-28T12:00:00Z", "ai_risk": 0.7,
                       "forensic": {"activeApp": "Code.exe", "activeWindow": "main.rs, edited"},
                       "behavior": {"wpm": 64}}),
                json!({"subject_id": "u1", "timestamp": "2026-01-28T12:00:02Z", "ai_risk": 0.75,
                       "forensic": {"activeApp": "Code.exe", "activeWindow": "lib.rs"},
                       "behavior": {"wpm": 70}}),
                json!({"subject_id": "u2"}),
            ],
        )
        .await;

        let csv = svc.export_csv().await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "u1,2026-01-28T12:00:02Z,Code.exe,lib.rs,0.75,70");
        assert_eq!(lines[2], "u2,N/A,N/A,N/A,0,0");
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn test_backup_keyed_by_subject() {
        let (_, svc) = seeded(
            marker_policy(),
            &[
                json!({"subject_id": "b", "timestamp": "T1"}),
                json!({"subject_id": "a", "timestamp": "T1", "ai_risk": 0.3}),
            ],
        )
        .await;

        let backup = svc.export_backup().await.unwrap();
        assert_eq!(backup.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(backup["a"].ai_risk, Some(0.3));
    }

    #[tokio::test]
    async fn test_purge_without_marked_subjects_is_noop() {
        let (store, svc) = seeded(
            marker_policy(),
            &[
                json!({"subject_id": "alice", "timestamp": "T1"}),
                json!({"subject_id": "bob", "timestamp": "T1"}),
            ],
        )
        .await;

        let report = svc.purge().await.unwrap();
        assert_eq!(report.purged, 0);
        assert_eq!(report.scanned, 2);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_removes_marked_subjects_case_insensitively() {
        let (store, svc) = seeded(
            marker_policy(),
            &[
                json!({"subject_id": "user_TEST_1", "timestamp": "T1"}),
                json!({"subject_id": "user-Test", "timestamp": "T1"}),
                json!({"subject_id": "alice", "timestamp": "T1"}),
            ],
        )
        .await;

        let report = svc.purge().await.unwrap();
        assert_eq!(report.purged, 2);

        let remaining = store.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].subject_id, "alice");
        assert_eq!(store.history_len("user_TEST_1").await, 0);
    }

    #[tokio::test]
    async fn test_purge_keeps_subjects_without_user_marker() {
        let (store, svc) = seeded(
            marker_policy(),
            &[
                json!({"subject_id": "greatest-hits-kiosk", "timestamp": "T1"}),
                json!({"subject_id": "attestation-box", "timestamp": "T1"}),
                json!({"subject_id": "load-test", "timestamp": "T1"}),
                json!({"subject_id": "USER_test_2", "timestamp": "T1"}),
                json!({"subject_id": "alice", "timestamp": "T1"}),
            ],
        )
        .await;

        let report = svc.purge().await.unwrap();
        assert_eq!(report.scanned, 5);
        assert_eq!(report.purged, 0);
        assert_eq!(store.list_all().await.unwrap().len(), 5);
        assert_eq!(store.history_len("attestation-box").await, 1);
    }

    #[tokio::test]
    async fn test_marker_purge_only_scans_one_batch() {
        let bodies: Vec<Value> = (0..5)
            .map(|i| json!({"subject_id": format!("user-test-{}", i), "timestamp": "T1"}))
            .collect();
        let (store, svc) = seeded(marker_policy_with_batch(3), &bodies).await;

        assert_eq!(svc.purge().await.unwrap().purged, 3);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_age_purge_sweeps_all_pages() {
        let now = Utc::now();
        let old = (now - chrono::Duration::days(45)).to_rfc3339();
        let fresh = (now - chrono::Duration::days(2)).to_rfc3339();

        let mut bodies = Vec::new();
        for i in 0..7 {
            bodies.push(json!({"subject_id": format!("old-{}", i), "timestamp": old}));
        }
        bodies.push(json!({"subject_id": "fresh", "timestamp": fresh}));
        bodies.push(json!({"subject_id": "undated"}));
        bodies.push(json!({"subject_id": "garbled", "timestamp": "03:15:00 PM"}));

        let (store, svc) = seeded(
            PurgePolicy::Age {
                retention: chrono::Duration::days(30),
                page_size: 3,
            },
            &bodies,
        )
        .await;

        let report = svc.purge().await.unwrap();
        assert_eq!(report.scanned, 10);
        assert_eq!(report.purged, 7);

        let mut remaining: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.subject_id)
            .collect();
        remaining.sort();
        assert_eq!(remaining, ["fresh", "garbled", "undated"]);
    }
}
