use async_trait::async_trait;
use casesync_core::{
    Movement, NewMovement, NewNotification, NewTrackedProcess, Notification, ProcessStatus,
    StoredMovementKey, SyncLogEntry, TrackedProcess,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ProcessStore;

#[derive(Debug, Default)]
struct MemoryState {
    processes: Vec<TrackedProcess>,
    movements: Vec<Movement>,
    sync_logs: Vec<SyncLogEntry>,
    notifications: Vec<Notification>,
}

/// Process store kept entirely in memory. Mirrors the Postgres constraints that matter
/// to the pipeline, notably uniqueness of `(process_id, dedup_hash)`.
#[derive(Debug, Default)]
pub struct MemoryProcessStore {
    state: Mutex<MemoryState>,
}

impl MemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sync_logs(&self) -> Vec<SyncLogEntry> {
        self.state.lock().await.sync_logs.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    pub async fn movement_count(&self) -> usize {
        self.state.lock().await.movements.len()
    }
}

#[async_trait]
impl ProcessStore for MemoryProcessStore {
    async fn insert_process(&self, new: NewTrackedProcess) -> anyhow::Result<TrackedProcess> {
        let process = TrackedProcess {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            case_number: new.case_number,
            tracking_id: new.tracking_id,
            last_request_id: None,
            monitoring_enabled: new.monitoring_enabled,
            last_sync_at: None,
            unread_count: 0,
            status: ProcessStatus::Active,
            created_at: Utc::now(),
        };
        self.state.lock().await.processes.push(process.clone());
        Ok(process)
    }

    async fn get_process(&self, id: Uuid) -> anyhow::Result<Option<TrackedProcess>> {
        let state = self.state.lock().await;
        Ok(state.processes.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> anyhow::Result<Option<TrackedProcess>> {
        let state = self.state.lock().await;
        Ok(state
            .processes
            .iter()
            .find(|p| p.tracking_id.as_deref() == Some(tracking_id))
            .cloned())
    }

    async fn list_sharing_case(
        &self,
        tenant_id: Uuid,
        case_number: &str,
    ) -> anyhow::Result<Vec<TrackedProcess>> {
        let state = self.state.lock().await;
        Ok(state
            .processes
            .iter()
            .filter(|p| {
                p.tenant_id == tenant_id
                    && p.case_number == case_number
                    && p.status == ProcessStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn list_monitored(&self) -> anyhow::Result<Vec<TrackedProcess>> {
        let state = self.state.lock().await;
        Ok(state
            .processes
            .iter()
            .filter(|p| p.monitoring_enabled && p.status == ProcessStatus::Active)
            .cloned()
            .collect())
    }

    async fn set_request_id(&self, process_id: Uuid, request_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(process) = state.processes.iter_mut().find(|p| p.id == process_id) {
            process.last_request_id = Some(request_id.to_string());
        }
        Ok(())
    }

    async fn set_monitoring(&self, process_id: Uuid, enabled: bool) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        match state.processes.iter_mut().find(|p| p.id == process_id) {
            Some(process) => {
                process.monitoring_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn archive_process(&self, process_id: Uuid) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        match state.processes.iter_mut().find(|p| p.id == process_id) {
            Some(process) => {
                process.status = ProcessStatus::Archived;
                process.monitoring_enabled = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn movement_keys(&self, process_id: Uuid) -> anyhow::Result<Vec<StoredMovementKey>> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.process_id == process_id)
            .map(|m| StoredMovementKey {
                movement_date: m.movement_date,
                description: m.description.clone(),
            })
            .collect())
    }

    async fn insert_movement(&self, movement: NewMovement) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if state
            .movements
            .iter()
            .any(|m| m.process_id == movement.process_id && m.dedup_hash == movement.dedup_hash)
        {
            return Ok(false);
        }
        state.movements.push(Movement {
            id: Uuid::new_v4(),
            process_id: movement.process_id,
            tenant_id: movement.tenant_id,
            movement_date: movement.movement_date,
            description: movement.description,
            raw_payload: movement.raw_payload,
            dedup_hash: movement.dedup_hash,
            read: false,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn list_movements(&self, process_id: Uuid) -> anyhow::Result<Vec<Movement>> {
        let state = self.state.lock().await;
        let mut rows = state
            .movements
            .iter()
            .filter(|m| m.process_id == process_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.movement_date.cmp(&a.movement_date));
        Ok(rows)
    }

    async fn record_sync(
        &self,
        process_id: Uuid,
        synced_at: DateTime<Utc>,
        new_unread: i64,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(process) = state.processes.iter_mut().find(|p| p.id == process_id) {
            process.last_sync_at = Some(synced_at);
            process.unread_count += new_unread;
        }
        Ok(())
    }

    async fn mark_movements_read(&self, process_id: Uuid) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        let mut touched = 0u64;
        for movement in state
            .movements
            .iter_mut()
            .filter(|m| m.process_id == process_id && !m.read)
        {
            movement.read = true;
            touched += 1;
        }
        if let Some(process) = state.processes.iter_mut().find(|p| p.id == process_id) {
            process.unread_count = 0;
        }
        Ok(touched)
    }

    async fn append_sync_log(&self, entry: SyncLogEntry) -> anyhow::Result<()> {
        self.state.lock().await.sync_logs.push(entry);
        Ok(())
    }

    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            process_id: new.process_id,
            title: new.title,
            body: new.body,
            read: false,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(notification)
    }
}
