//! Database module - PostgreSQL connection and schema

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Latest state (one row per subject, overwritten on every ingest)
CREATE TABLE IF NOT EXISTS telemetry_latest (
    subject_id TEXT PRIMARY KEY,
    timestamp TEXT,
    record JSONB NOT NULL,
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- History (time travel), keyed by sanitized timestamp
CREATE TABLE IF NOT EXISTS telemetry_history (
    subject_id TEXT NOT NULL,
    history_key TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    record JSONB NOT NULL,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    PRIMARY KEY (subject_id, history_key)
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_history_subject_ts_c ON telemetry_history(subject_id, timestamp COLLATE "C" DESC);
CREATE INDEX IF NOT EXISTS idx_latest_timestamp ON telemetry_latest(timestamp);
"#;
