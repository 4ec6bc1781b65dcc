//! PostgreSQL telemetry store

use sqlx::{types::Json, PgPool};

use super::{HistoryLog, LatestStateStore, StoreResult, TelemetryStore};
use crate::models::{HistoryEntry, TelemetryRecord};

#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UPSERT_LATEST_SQL: &str = r#"
    INSERT INTO telemetry_latest (subject_id, timestamp, record)
    VALUES ($1, $2, $3)
    ON CONFLICT (subject_id) DO UPDATE SET
        timestamp = EXCLUDED.timestamp,
        record = EXCLUDED.record,
        updated_at = NOW()
"#;

const UPSERT_HISTORY_SQL: &str = r#"
    INSERT INTO telemetry_history (subject_id, history_key, timestamp, record)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (subject_id, history_key) DO UPDATE SET
        timestamp = EXCLUDED.timestamp,
        record = EXCLUDED.record,
        created_at = NOW()
"#;

/// Newest-first window; `COLLATE "C"` compares timestamps bytewise like the
/// in-memory store
const HISTORY_WINDOW_SQL: &str = r#"
    SELECT record FROM telemetry_history
    WHERE subject_id = $1
    ORDER BY timestamp COLLATE "C" DESC
    LIMIT $2
"#;

const LIST_PAGE_SQL: &str = r#"
    SELECT record FROM telemetry_latest
    WHERE $1::TEXT IS NULL OR subject_id COLLATE "C" > $1
    ORDER BY subject_id COLLATE "C" ASC
    LIMIT $2
"#;

#[axum::async_trait]
impl LatestStateStore for PgTelemetryStore {
    async fn put(&self, record: &TelemetryRecord) -> StoreResult<()> {
        sqlx::query(UPSERT_LATEST_SQL)
            .bind(&record.subject_id)
            .bind(&record.timestamp)
            .bind(Json(record))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, subject_id: &str) -> StoreResult<Option<TelemetryRecord>> {
        let row = sqlx::query_scalar::<_, Json<TelemetryRecord>>(
            "SELECT record FROM telemetry_latest WHERE subject_id = $1"
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|Json(record)| record))
    }

    async fn list_all(&self) -> StoreResult<Vec<TelemetryRecord>> {
        let rows = sqlx::query_scalar::<_, Json<TelemetryRecord>>(
            "SELECT record FROM telemetry_latest"
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|Json(record)| record).collect())
    }

    async fn list_page(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<TelemetryRecord>> {
        let rows = sqlx::query_scalar::<_, Json<TelemetryRecord>>(LIST_PAGE_SQL)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|Json(record)| record).collect())
    }

    async fn delete(&self, subject_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM telemetry_latest WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[axum::async_trait]
impl HistoryLog for PgTelemetryStore {
    async fn append(&self, subject_id: &str, entry: &HistoryEntry) -> StoreResult<()> {
        sqlx::query(UPSERT_HISTORY_SQL)
            .bind(subject_id)
            .bind(&entry.key)
            .bind(&entry.timestamp)
            .bind(Json(&entry.record))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn window(&self, subject_id: &str, limit: usize) -> StoreResult<Vec<TelemetryRecord>> {
        let rows = sqlx::query_scalar::<_, Json<TelemetryRecord>>(HISTORY_WINDOW_SQL)
        .bind(subject_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Newest-first from the query, oldest-first for the slider
        Ok(rows.into_iter().rev().map(|Json(record)| record).collect())
    }

    async fn remove_subject(&self, subject_id: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM telemetry_history WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[axum::async_trait]
impl TelemetryStore for PgTelemetryStore {
    /// Both writes commit together, closing the partial-write window.
    async fn record_snapshot(&self, record: &TelemetryRecord, entry: &HistoryEntry) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_LATEST_SQL)
            .bind(&record.subject_id)
            .bind(&record.timestamp)
            .bind(Json(record))
            .execute(&mut *tx)
            .await?;

        sqlx::query(UPSERT_HISTORY_SQL)
            .bind(&record.subject_id)
            .bind(&entry.key)
            .bind(&entry.timestamp)
            .bind(Json(&entry.record))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn purge_subject(&self, subject_id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM telemetry_history WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM telemetry_latest WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
