//! Telemetry record model

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::{AppError, AppResult};

/// One telemetry snapshot as stored in the latest-state set and history log.
///
/// Only `subject_id` is required. `behavior` and `forensic` are open
/// documents owned by the producer, and unknown top-level fields are kept
/// in `extra` so the stored snapshot matches what the agent sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TelemetryRecord {
    #[serde(alias = "user")]
    #[validate(length(min = 1, message = "subject_id must not be empty"))]
    pub subject_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, alias = "ai", skip_serializing_if = "Option::is_none")]
    pub ai_risk: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forensic: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire form of a snapshot, before the subject identity is resolved
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryPayload {
    #[serde(default, alias = "user")]
    pub subject_id: Option<String>,

    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default, alias = "ai")]
    pub ai_risk: Option<f64>,

    #[serde(default)]
    pub behavior: Option<Map<String, Value>>,

    #[serde(default)]
    pub forensic: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryPayload {
    /// Parse a raw request body. Anything but a JSON object is rejected.
    pub fn from_slice(raw: &[u8]) -> AppResult<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| AppError::ValidationError(format!("Invalid JSON payload: {}", e)))?;

        if !value.is_object() {
            return Err(AppError::ValidationError(
                "Telemetry payload must be a JSON object".to_string(),
            ));
        }

        serde_json::from_value(value)
            .map_err(|e| AppError::ValidationError(format!("Invalid telemetry payload: {}", e)))
    }

    /// Resolve the subject identity and validate the resulting record.
    ///
    /// An absent subject falls back to `default_subject` when one is
    /// configured. An explicitly blank subject is always rejected.
    pub fn into_record(self, default_subject: Option<&str>) -> AppResult<TelemetryRecord> {
        let subject_id = match self.subject_id {
            Some(id) => id.trim().to_string(),
            None => match default_subject {
                Some(fallback) => {
                    tracing::warn!(
                        "Telemetry payload without subject id, assigning fallback subject '{}'",
                        fallback
                    );
                    fallback.to_string()
                }
                None => {
                    return Err(AppError::ValidationError(
                        "subject_id is required".to_string(),
                    ))
                }
            },
        };

        let record = TelemetryRecord {
            subject_id,
            timestamp: self.timestamp,
            ai_risk: self.ai_risk,
            behavior: self.behavior,
            forensic: self.forensic,
            extra: self.extra,
        };

        record
            .validate()
            .map_err(|e| AppError::ValidationError(e.to_string()))?;

        Ok(record)
    }
}

impl TelemetryRecord {
    /// String-valued field inside `forensic`, if present
    pub fn forensic_field(&self, key: &str) -> Option<&Value> {
        self.forensic.as_ref().and_then(|f| f.get(key))
    }

    /// Field inside `behavior`, if present
    pub fn behavior_field(&self, key: &str) -> Option<&Value> {
        self.behavior.as_ref().and_then(|b| b.get(key))
    }

    /// Parse the producer timestamp as UTC.
    ///
    /// Accepts RFC 3339 and naive ISO-8601 (treated as UTC, which is what
    /// the capture agent emits).
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }
}

/// A record positioned in a subject's history log
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Sanitized timestamp, unique per subject
    pub key: String,
    /// Ordering timestamp (producer's, or the server stamp)
    pub timestamp: String,
    pub record: TelemetryRecord,
}

impl HistoryEntry {
    /// Build the history copy of a record. A missing producer timestamp is
    /// replaced with `stamped_at` on the history copy only.
    pub fn for_record(record: &TelemetryRecord, stamped_at: DateTime<Utc>) -> Self {
        let timestamp = record
            .timestamp
            .clone()
            .unwrap_or_else(|| stamped_at.to_rfc3339_opts(SecondsFormat::Micros, true));

        let mut history_record = record.clone();
        history_record.timestamp = Some(timestamp.clone());

        Self {
            key: history_key(&timestamp),
            timestamp,
            record: history_record,
        }
    }
}

/// Identifier-safe history key: `:` and `.` become `-`
pub fn history_key(timestamp: &str) -> String {
    timestamp.replace(':', "-").replace('.', "-")
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
