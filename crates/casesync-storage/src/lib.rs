//! Persistence for tracked processes + HTTP transport utilities for the provider client.

use async_trait::async_trait;
use casesync_core::{
    Movement, NewMovement, NewNotification, NewTrackedProcess, Notification, StoredMovementKey,
    SyncLogEntry, TrackedProcess,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod http;
mod memory;
mod postgres;

pub use http::{EndpointLabel, FetchError, FetchedResponse, HttpClientConfig, HttpTransport};
pub use memory::MemoryProcessStore;
pub use postgres::PgProcessStore;

pub const CRATE_NAME: &str = "casesync-storage";

/// Relational operations the sync pipeline needs.
///
/// Every write is an individual row operation; there is no transaction spanning
/// several calls, so a failure midway leaves earlier writes in place.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    async fn insert_process(&self, new: NewTrackedProcess) -> anyhow::Result<TrackedProcess>;

    async fn get_process(&self, id: Uuid) -> anyhow::Result<Option<TrackedProcess>>;

    async fn find_by_tracking_id(&self, tracking_id: &str)
        -> anyhow::Result<Option<TrackedProcess>>;

    /// All active rows of `tenant_id` that reference `case_number`, oldest first.
    async fn list_sharing_case(
        &self,
        tenant_id: Uuid,
        case_number: &str,
    ) -> anyhow::Result<Vec<TrackedProcess>>;

    async fn list_monitored(&self) -> anyhow::Result<Vec<TrackedProcess>>;

    async fn set_request_id(&self, process_id: Uuid, request_id: &str) -> anyhow::Result<()>;

    async fn set_monitoring(&self, process_id: Uuid, enabled: bool) -> anyhow::Result<bool>;

    /// Soft delete: flips the status to archived and stops monitoring. Rows and
    /// movements are kept.
    async fn archive_process(&self, process_id: Uuid) -> anyhow::Result<bool>;

    async fn movement_keys(&self, process_id: Uuid) -> anyhow::Result<Vec<StoredMovementKey>>;

    /// Returns `false` when a movement with the same dedup hash already exists.
    async fn insert_movement(&self, movement: NewMovement) -> anyhow::Result<bool>;

    async fn list_movements(&self, process_id: Uuid) -> anyhow::Result<Vec<Movement>>;

    /// Stamps `last_sync_at` and adds `new_unread` to the unread counter.
    async fn record_sync(
        &self,
        process_id: Uuid,
        synced_at: DateTime<Utc>,
        new_unread: i64,
    ) -> anyhow::Result<()>;

    /// Marks every movement read and resets the unread counter. Returns rows touched.
    async fn mark_movements_read(&self, process_id: Uuid) -> anyhow::Result<u64>;

    async fn append_sync_log(&self, entry: SyncLogEntry) -> anyhow::Result<()>;

    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification>;
}
