//! Core domain model for court-process synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "casesync-core";

/// Soft lifecycle status; tracked processes are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    Active,
    Archived,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Active => "active",
            ProcessStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "archived" => ProcessStatus::Archived,
            _ => ProcessStatus::Active,
        }
    }
}

/// A tenant's record of one external legal case being monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProcess {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub case_number: String,
    pub tracking_id: Option<String>,
    pub last_request_id: Option<String>,
    pub monitoring_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a tracked process (manual import or bulk load).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTrackedProcess {
    pub tenant_id: Uuid,
    pub case_number: String,
    #[serde(default)]
    pub tracking_id: Option<String>,
    #[serde(default)]
    pub monitoring_enabled: bool,
}

/// One timestamped event (andamento) belonging to a tracked process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub process_id: Uuid,
    pub tenant_id: Uuid,
    pub movement_date: DateTime<Utc>,
    pub description: String,
    pub raw_payload: JsonValue,
    pub dedup_hash: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Movement ready for insertion. `dedup_hash` is computed by the deduplicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMovement {
    pub process_id: Uuid,
    pub tenant_id: Uuid,
    pub movement_date: DateTime<Utc>,
    pub description: String,
    pub raw_payload: JsonValue,
    pub dedup_hash: String,
}

/// The (date, description) pair of a stored movement, as needed to rebuild dedup keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMovementKey {
    pub movement_date: DateTime<Utc>,
    pub description: String,
}

/// Append-only audit row written per external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub process_id: Option<Uuid>,
    pub endpoint: String,
    pub payload: JsonValue,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn success(process: Option<&TrackedProcess>, endpoint: &str, payload: JsonValue) -> Self {
        Self::build(process, endpoint, payload, None)
    }

    pub fn failure(
        process: Option<&TrackedProcess>,
        endpoint: &str,
        payload: JsonValue,
        error: impl Into<String>,
    ) -> Self {
        Self::build(process, endpoint, payload, Some(error.into()))
    }

    fn build(
        process: Option<&TrackedProcess>,
        endpoint: &str,
        payload: JsonValue,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: process.map(|p| p.tenant_id),
            process_id: process.map(|p| p.id),
            endpoint: endpoint.to_string(),
            payload,
            success: error.is_none(),
            error,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub process_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub tenant_id: Uuid,
    pub process_id: Option<Uuid>,
    pub title: String,
    pub body: String,
}
