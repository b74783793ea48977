use anyhow::Context;
use async_trait::async_trait;
use casesync_core::{
    Movement, NewMovement, NewNotification, NewTrackedProcess, Notification, ProcessStatus,
    StoredMovementKey, SyncLogEntry, TrackedProcess,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::ProcessStore;

const PROCESS_COLUMNS: &str = "id, tenant_id, case_number, tracking_id, last_request_id, \
     monitoring_enabled, last_sync_at, unread_count, status, created_at";

#[derive(Debug, Clone)]
pub struct PgProcessStore {
    pool: PgPool,
}

impl PgProcessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        info!("migrations applied");
        Ok(())
    }
}

fn process_from_row(row: &PgRow) -> anyhow::Result<TrackedProcess> {
    let status: String = row.try_get("status")?;
    Ok(TrackedProcess {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        case_number: row.try_get("case_number")?,
        tracking_id: row.try_get("tracking_id")?,
        last_request_id: row.try_get("last_request_id")?,
        monitoring_enabled: row.try_get("monitoring_enabled")?,
        last_sync_at: row.try_get("last_sync_at")?,
        unread_count: row.try_get("unread_count")?,
        status: ProcessStatus::parse(&status),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ProcessStore for PgProcessStore {
    async fn insert_process(&self, new: NewTrackedProcess) -> anyhow::Result<TrackedProcess> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tracked_processes (id, tenant_id, case_number, tracking_id, monitoring_enabled, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PROCESS_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(&new.case_number)
        .bind(&new.tracking_id)
        .bind(new.monitoring_enabled)
        .bind(ProcessStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await
        .context("inserting tracked process")?;
        process_from_row(&row)
    }

    async fn get_process(&self, id: Uuid) -> anyhow::Result<Option<TrackedProcess>> {
        let row = sqlx::query(&format!(
            "SELECT {PROCESS_COLUMNS} FROM tracked_processes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("loading tracked process")?;
        row.as_ref().map(process_from_row).transpose()
    }

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> anyhow::Result<Option<TrackedProcess>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {PROCESS_COLUMNS}
              FROM tracked_processes
             WHERE tracking_id = $1
             ORDER BY created_at
             LIMIT 1
            "#
        ))
        .bind(tracking_id)
        .fetch_optional(&self.pool)
        .await
        .context("resolving tracking id")?;
        row.as_ref().map(process_from_row).transpose()
    }

    async fn list_sharing_case(
        &self,
        tenant_id: Uuid,
        case_number: &str,
    ) -> anyhow::Result<Vec<TrackedProcess>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PROCESS_COLUMNS}
              FROM tracked_processes
             WHERE tenant_id = $1
               AND case_number = $2
               AND status = 'active'
             ORDER BY created_at
            "#
        ))
        .bind(tenant_id)
        .bind(case_number)
        .fetch_all(&self.pool)
        .await
        .context("listing processes sharing a case number")?;
        rows.iter().map(process_from_row).collect()
    }

    async fn list_monitored(&self) -> anyhow::Result<Vec<TrackedProcess>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PROCESS_COLUMNS}
              FROM tracked_processes
             WHERE monitoring_enabled
               AND status = 'active'
             ORDER BY last_sync_at NULLS FIRST, created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing monitored processes")?;
        rows.iter().map(process_from_row).collect()
    }

    async fn set_request_id(&self, process_id: Uuid, request_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE tracked_processes SET last_request_id = $2 WHERE id = $1")
            .bind(process_id)
            .bind(request_id)
            .execute(&self.pool)
            .await
            .context("storing request id")?;
        Ok(())
    }

    async fn set_monitoring(&self, process_id: Uuid, enabled: bool) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE tracked_processes SET monitoring_enabled = $2 WHERE id = $1")
                .bind(process_id)
                .bind(enabled)
                .execute(&self.pool)
                .await
                .context("toggling monitoring")?;
        Ok(result.rows_affected() > 0)
    }

    async fn archive_process(&self, process_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_processes
               SET status = $2,
                   monitoring_enabled = FALSE
             WHERE id = $1
            "#,
        )
        .bind(process_id)
        .bind(ProcessStatus::Archived.as_str())
        .execute(&self.pool)
        .await
        .context("archiving process")?;
        Ok(result.rows_affected() > 0)
    }

    async fn movement_keys(&self, process_id: Uuid) -> anyhow::Result<Vec<StoredMovementKey>> {
        let rows = sqlx::query(
            "SELECT movement_date, description FROM movements WHERE process_id = $1",
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await
        .context("loading existing movement keys")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(StoredMovementKey {
                movement_date: row.try_get("movement_date")?,
                description: row.try_get("description")?,
            });
        }
        Ok(out)
    }

    async fn insert_movement(&self, movement: NewMovement) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO movements (id, process_id, tenant_id, movement_date, description, raw_payload, dedup_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (process_id, dedup_hash) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(movement.process_id)
        .bind(movement.tenant_id)
        .bind(movement.movement_date)
        .bind(&movement.description)
        .bind(&movement.raw_payload)
        .bind(&movement.dedup_hash)
        .execute(&self.pool)
        .await
        .context("inserting movement")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_movements(&self, process_id: Uuid) -> anyhow::Result<Vec<Movement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, process_id, tenant_id, movement_date, description, raw_payload,
                   dedup_hash, read, created_at
              FROM movements
             WHERE process_id = $1
             ORDER BY movement_date DESC
            "#,
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await
        .context("listing movements")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Movement {
                id: row.try_get("id")?,
                process_id: row.try_get("process_id")?,
                tenant_id: row.try_get("tenant_id")?,
                movement_date: row.try_get("movement_date")?,
                description: row.try_get("description")?,
                raw_payload: row.try_get("raw_payload")?,
                dedup_hash: row.try_get("dedup_hash")?,
                read: row.try_get("read")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }

    async fn record_sync(
        &self,
        process_id: Uuid,
        synced_at: DateTime<Utc>,
        new_unread: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE tracked_processes
               SET last_sync_at = $2,
                   unread_count = unread_count + $3
             WHERE id = $1
            "#,
        )
        .bind(process_id)
        .bind(synced_at)
        .bind(new_unread)
        .execute(&self.pool)
        .await
        .context("recording sync")?;
        Ok(())
    }

    async fn mark_movements_read(&self, process_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE movements SET read = TRUE WHERE process_id = $1 AND read = FALSE",
        )
        .bind(process_id)
        .execute(&self.pool)
        .await
        .context("marking movements read")?;
        sqlx::query("UPDATE tracked_processes SET unread_count = 0 WHERE id = $1")
            .bind(process_id)
            .execute(&self.pool)
            .await
            .context("resetting unread counter")?;
        Ok(result.rows_affected())
    }

    async fn append_sync_log(&self, entry: SyncLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_logs (id, tenant_id, process_id, endpoint, payload, success, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.process_id)
        .bind(&entry.endpoint)
        .bind(&entry.payload)
        .bind(entry.success)
        .bind(&entry.error)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("appending sync log")?;
        Ok(())
    }

    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications (id, tenant_id, process_id, title, body)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, tenant_id, process_id, title, body, read, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(new.process_id)
        .bind(&new.title)
        .bind(&new.body)
        .fetch_one(&self.pool)
        .await
        .context("creating notification")?;
        Ok(Notification {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            process_id: row.try_get("process_id")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            read: row.try_get("read")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
