use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use casesync_core::{NewMovement, NewNotification, Notification, StoredMovementKey};
use casesync_provider::{PollOutcome, ProviderError, ResponsePage};
use casesync_storage::MemoryProcessStore;
use chrono::DateTime;
use serde_json::{json, Value as JsonValue};

use super::*;

#[derive(Default)]
struct FakeProvider {
    searches: Mutex<Vec<String>>,
    polls: AtomicUsize,
    next_request: AtomicUsize,
    ready: Mutex<HashMap<String, Vec<ResponsePage>>>,
    pages_for_new: Mutex<Vec<ResponsePage>>,
    fail_search: Option<(u16, String)>,
}

impl FakeProvider {
    fn with_steps(steps: JsonValue) -> Self {
        Self {
            pages_for_new: Mutex::new(pages(steps)),
            ..Default::default()
        }
    }

    fn publish(&self, request_id: &str, steps: JsonValue) {
        self.ready
            .lock()
            .unwrap()
            .insert(request_id.to_string(), pages(steps));
    }

    /// What any search created from now on will return.
    fn offer_for_new_searches(&self, steps: JsonValue) {
        *self.pages_for_new.lock().unwrap() = pages(steps);
    }

    fn search_count(&self) -> usize {
        self.searches.lock().unwrap().len()
    }
}

fn pages(steps: JsonValue) -> Vec<ResponsePage> {
    vec![ResponsePage {
        request_id: None,
        response_type: Some("lawsuit".into()),
        response_data: json!({ "code": "0001234-56.2024.5.02.0001", "steps": steps }),
    }]
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn create_search(&self, case_number: &str) -> Result<String, ProviderError> {
        if let Some((status, body)) = &self.fail_search {
            return Err(ProviderError::Status {
                status: *status,
                body: body.clone(),
            });
        }
        self.searches.lock().unwrap().push(case_number.to_string());
        let id = format!("new-{}", self.next_request.fetch_add(1, Ordering::SeqCst));
        let pages = self.pages_for_new.lock().unwrap().clone();
        self.ready.lock().unwrap().insert(id.clone(), pages);
        Ok(id)
    }

    async fn poll_result(&self, request_id: &str) -> Result<PollOutcome, ProviderError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.ready.lock().unwrap().get(request_id) {
            Some(pages) if !pages.is_empty() => Ok(PollOutcome::Ready(pages.clone())),
            _ => Ok(PollOutcome::Pending),
        }
    }

    async fn get_tracking(&self, tracking_id: &str) -> Result<TrackingRecord, ProviderError> {
        Ok(TrackingRecord {
            tracking_id: tracking_id.to_string(),
            status: Some("updating".into()),
            recurrence: Some(1),
            request_id: None,
            search: JsonValue::Null,
        })
    }
}

const CASE: &str = "0001234-56.2024.5.02.0001";

fn config(policy: ExpiredRequestPolicy) -> PipelineConfig {
    let fast = PollerConfig {
        interval: Duration::ZERO,
        max_attempts: 3,
    };
    PipelineConfig {
        manual_poll: fast,
        scheduled_poll: fast,
        expired_request_policy: policy,
    }
}

fn pipeline(store: &Arc<MemoryProcessStore>, provider: &Arc<FakeProvider>) -> SyncPipeline {
    pipeline_with(store, provider, ExpiredRequestPolicy::Fail)
}

fn pipeline_with(
    store: &Arc<MemoryProcessStore>,
    provider: &Arc<FakeProvider>,
    policy: ExpiredRequestPolicy,
) -> SyncPipeline {
    SyncPipeline::new(store.clone(), provider.clone(), config(policy))
}

async fn add_process(
    store: &MemoryProcessStore,
    tenant_id: Uuid,
    case_number: &str,
    tracking_id: Option<&str>,
) -> TrackedProcess {
    store
        .insert_process(NewTrackedProcess {
            tenant_id,
            case_number: case_number.to_string(),
            tracking_id: tracking_id.map(str::to_string),
            monitoring_enabled: true,
        })
        .await
        .unwrap()
}

fn one_step() -> JsonValue {
    json!([{ "step_date": "2024-01-05T10:00:00Z", "content": "Juntada de documento X" }])
}

fn webhook_fixture() -> WebhookPayload {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/judit/webhook.json");
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn same_batch_ingested_twice_inserts_once() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    let pipeline = pipeline(&store, &provider);
    let process = add_process(&store, Uuid::new_v4(), CASE, None).await;

    let first = pipeline
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(first.request.origin, RequestOrigin::Created);
    assert_eq!(first.inserted, 1);

    let second = pipeline
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.request.origin, RequestOrigin::Created);
    assert_eq!(provider.search_count(), 2);
    assert_eq!(store.movement_count().await, 1);
}

#[tokio::test]
async fn resync_of_a_lone_row_pays_for_fresh_results() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    let pipeline = pipeline(&store, &provider);
    let process = add_process(&store, Uuid::new_v4(), CASE, None).await;

    let first = pipeline
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);

    provider.offer_for_new_searches(json!([
        { "step_date": "2024-01-05T10:00:00Z", "content": "Juntada de documento X" },
        { "step_date": "2024-02-01T08:00:00Z", "content": "Sentenca publicada" },
    ]));
    let second = pipeline
        .sync_process(
            process.id,
            SyncOptions {
                trigger: SyncTrigger::Scheduled,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(second.request.origin, RequestOrigin::Created);
    assert_eq!(second.request.request_id, "new-1");
    assert_eq!(second.inserted, 1);
    assert_eq!(second.duplicates, 1);
    assert_eq!(provider.search_count(), 2);
    let row = store.get_process(process.id).await.unwrap().unwrap();
    assert_eq!(row.last_request_id.as_deref(), Some("new-1"));
    assert_eq!(row.unread_count, 2);
}

#[tokio::test]
async fn a_borrowed_request_id_is_only_consumed_once_per_row() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    provider.publish("r1", one_step());
    let tenant = Uuid::new_v4();
    let a = add_process(&store, tenant, CASE, None).await;
    let b = add_process(&store, tenant, CASE, None).await;
    store.set_request_id(a.id, "r1").await.unwrap();
    let pipeline = pipeline(&store, &provider);

    let first = pipeline
        .sync_process(b.id, SyncOptions::default())
        .await
        .unwrap();
    assert!(first.request.is_reused());
    assert_eq!(provider.search_count(), 0);

    let again = pipeline
        .sync_process(b.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(again.request.origin, RequestOrigin::Created);
    assert_eq!(provider.search_count(), 1);

    // a now picks up the id b paid for instead of its own stale one.
    let from_a = pipeline
        .sync_process(a.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(
        from_a.request,
        ResolvedRequest {
            request_id: "new-0".into(),
            origin: RequestOrigin::Reused { from_process: b.id },
        }
    );
    assert_eq!(provider.search_count(), 1);
}

#[tokio::test]
async fn shared_request_id_is_reused_without_a_paid_search() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    provider.publish("r1", one_step());
    let tenant = Uuid::new_v4();
    let a = add_process(&store, tenant, CASE, None).await;
    let b = add_process(&store, tenant, CASE, None).await;
    store.set_request_id(a.id, "r1").await.unwrap();

    let outcome = pipeline(&store, &provider)
        .sync_process(b.id, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.request.request_id, "r1");
    assert_eq!(
        outcome.request.origin,
        RequestOrigin::Reused { from_process: a.id }
    );
    assert_eq!(provider.search_count(), 0);
    let b = store.get_process(b.id).await.unwrap().unwrap();
    assert_eq!(b.last_request_id.as_deref(), Some("r1"));
    let a = store.get_process(a.id).await.unwrap().unwrap();
    assert_eq!(a.last_request_id.as_deref(), Some("r1"));
}

#[tokio::test]
async fn other_tenants_request_ids_are_not_shared() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    provider.publish("r1", one_step());
    let other = add_process(&store, Uuid::new_v4(), CASE, None).await;
    store.set_request_id(other.id, "r1").await.unwrap();
    let mine = add_process(&store, Uuid::new_v4(), CASE, None).await;

    let outcome = pipeline(&store, &provider)
        .sync_process(mine.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.request.origin, RequestOrigin::Created);
    assert_eq!(provider.search_count(), 1);
    let other = store.get_process(other.id).await.unwrap().unwrap();
    assert_eq!(other.last_request_id.as_deref(), Some("r1"));
}

#[tokio::test]
async fn ingestion_fans_out_to_every_sharing_row() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(json!([
        { "step_date": "2024-01-05T10:00:00Z", "content": "Juntada de documento X" },
        { "date": "2024-01-08T14:30:00Z", "description": "Conclusos para despacho" },
    ])));
    let tenant = Uuid::new_v4();
    let a = add_process(&store, tenant, CASE, None).await;
    let b = add_process(&store, tenant, CASE, None).await;
    let unrelated = add_process(&store, tenant, "9999999-00.2024.8.26.0100", None).await;

    let outcome = pipeline(&store, &provider)
        .sync_process(a.id, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.fan_out.targets.len(), 2);
    assert_eq!(outcome.fan_out.total_inserted(), 4);
    for id in [a.id, b.id] {
        let row = store.get_process(id).await.unwrap().unwrap();
        assert_eq!(row.unread_count, 2);
        assert!(row.last_sync_at.is_some());
        assert_eq!(store.list_movements(id).await.unwrap().len(), 2);
    }
    assert!(store.list_movements(unrelated.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicates_inside_one_batch_are_suppressed() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(json!([
        { "step_date": "2024-01-05T10:00:00Z", "content": "Juntada de documento X" },
        { "step_date": "2024-01-05T10:00:45Z", "content": "JUNTADA DE DOCUMENTO X" },
        { "step_date": "", "content": "no date" },
    ])));
    let process = add_process(&store, Uuid::new_v4(), CASE, None).await;

    let outcome = pipeline(&store, &provider)
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.duplicates, 1);
    assert_eq!(outcome.fan_out.steps_received, 3);
    assert_eq!(outcome.fan_out.skipped, 1);
}

#[tokio::test]
async fn expired_shared_request_fails_by_default() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    let tenant = Uuid::new_v4();
    let holder = add_process(&store, tenant, CASE, None).await;
    store.set_request_id(holder.id, "stale").await.unwrap();
    let process = add_process(&store, tenant, CASE, None).await;

    let err = pipeline(&store, &provider)
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Timeout { attempts: 3, .. }));
    assert_eq!(provider.search_count(), 0);
    assert_eq!(provider.polls.load(Ordering::SeqCst), 3);

    let logs = store.sync_logs().await;
    assert!(logs
        .iter()
        .any(|l| l.endpoint == "GET /responses" && !l.success));
}

#[tokio::test]
async fn expired_shared_request_can_fall_back_to_a_fresh_search() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    let tenant = Uuid::new_v4();
    let holder = add_process(&store, tenant, CASE, None).await;
    store.set_request_id(holder.id, "stale").await.unwrap();
    let process = add_process(&store, tenant, CASE, None).await;

    let outcome = pipeline_with(&store, &provider, ExpiredRequestPolicy::FreshRequest)
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.request.origin, RequestOrigin::FallbackCreated);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(provider.search_count(), 1);
}

#[tokio::test]
async fn forced_refresh_bypasses_cost_sharing() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    provider.publish("r1", one_step());
    let tenant = Uuid::new_v4();
    let holder = add_process(&store, tenant, CASE, None).await;
    store.set_request_id(holder.id, "r1").await.unwrap();
    let process = add_process(&store, tenant, CASE, None).await;

    let outcome = pipeline(&store, &provider)
        .sync_process(
            process.id,
            SyncOptions {
                force_new_request: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.request.origin, RequestOrigin::Created);
    assert_eq!(provider.search_count(), 1);
}

#[tokio::test]
async fn provider_failure_is_logged_and_surfaced() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider {
        fail_search: Some((402, "insufficient credits".into())),
        ..Default::default()
    });
    let process = add_process(&store, Uuid::new_v4(), CASE, None).await;

    let err = pipeline(&store, &provider)
        .sync_process(process.id, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Provider { status: 402, .. }));

    let logs = store.sync_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].endpoint, "POST /requests");
    assert!(!logs[0].success);
    assert!(logs[0].error.as_deref().unwrap().contains("insufficient credits"));
    assert_eq!(logs[0].process_id, Some(process.id));
}

#[tokio::test]
async fn unknown_process_is_not_found() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    let err = pipeline(&store, &provider)
        .sync_process(Uuid::new_v4(), SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn webhook_with_unknown_tracking_id_writes_nothing() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    add_process(&store, Uuid::new_v4(), CASE, Some("trk-other")).await;

    let err = pipeline(&store, &provider)
        .receive_webhook(webhook_fixture())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    assert_eq!(store.movement_count().await, 0);
    assert!(store.notifications().await.is_empty());
}

#[tokio::test]
async fn webhook_ingests_dedups_and_notifies_once() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    let tenant = Uuid::new_v4();
    let tracked = add_process(&store, tenant, CASE, Some("trk-0001")).await;
    let sibling = add_process(&store, tenant, CASE, None).await;
    let pipeline = pipeline(&store, &provider);

    let first = pipeline.receive_webhook(webhook_fixture()).await.unwrap();
    assert_eq!(
        first,
        WebhookReceipt {
            success: true,
            inserted: 2,
            duplicates: 1
        }
    );
    assert_eq!(store.list_movements(sibling.id).await.unwrap().len(), 2);

    let notifications = store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].tenant_id, tenant);
    assert_eq!(notifications[0].process_id, Some(tracked.id));

    let second = pipeline.receive_webhook(webhook_fixture()).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 3);
    assert_eq!(store.notifications().await.len(), 1);
    assert_eq!(provider.search_count(), 0);
}

#[tokio::test]
async fn webhook_accepts_data_key_and_requires_tracking_id() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    add_process(&store, Uuid::new_v4(), CASE, Some("trk-9")).await;
    let pipeline = pipeline(&store, &provider);

    let payload: WebhookPayload = serde_json::from_value(json!({
        "tracking_id": "trk-9",
        "data": [{ "data": "10/01/2024", "descricao": "Audiencia designada" }]
    }))
    .unwrap();
    assert_eq!(pipeline.receive_webhook(payload).await.unwrap().inserted, 1);

    let missing: WebhookPayload = serde_json::from_value(json!({ "results": [] })).unwrap();
    assert!(matches!(
        pipeline.receive_webhook(missing).await,
        Err(PipelineError::Validation(_))
    ));
}

#[tokio::test]
async fn delivery_is_terminal_once_ingested() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    add_process(&store, Uuid::new_v4(), CASE, Some("trk-0001")).await;
    let pipeline = pipeline(&store, &provider);

    let mut delivery = WebhookDelivery::new(webhook_fixture());
    assert_eq!(delivery.state(), &DeliveryState::Awaiting);
    let receipt = delivery.process(&pipeline).await.unwrap();
    assert_eq!(delivery.state(), &DeliveryState::Ingested(receipt));

    let again = delivery.process(&pipeline).await.unwrap();
    assert_eq!(again, receipt);
    assert_eq!(store.sync_logs().await.len(), 1);
}

#[tokio::test]
async fn monitoring_sweep_syncs_each_group_once() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    let tenant = Uuid::new_v4();
    add_process(&store, tenant, CASE, None).await;
    add_process(&store, tenant, CASE, None).await;
    add_process(&store, tenant, "9999999-00.2024.8.26.0100", None).await;
    let paused = add_process(&store, tenant, "1111111-11.2024.8.26.0100", None).await;
    store.set_monitoring(paused.id, false).await.unwrap();

    let summary = pipeline(&store, &provider).sync_monitored().await.unwrap();
    assert_eq!(summary.groups, 2);
    assert_eq!(summary.synced, 2);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.inserted, 3);
    assert_eq!(provider.search_count(), 2);
}

#[tokio::test]
async fn import_trims_and_validates_case_numbers() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    let pipeline = pipeline(&store, &provider);
    let tenant = Uuid::new_v4();

    let created = pipeline
        .bulk_import(tenant, ["  0001 ", "", "0002", "   "], false)
        .await
        .unwrap();
    assert_eq!(
        created.iter().map(|p| p.case_number.as_str()).collect::<Vec<_>>(),
        vec!["0001", "0002"]
    );

    let err = pipeline
        .import_process(NewTrackedProcess {
            tenant_id: tenant,
            case_number: "  ".into(),
            tracking_id: None,
            monitoring_enabled: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn tracking_status_requires_a_tracking_id() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    let pipeline = pipeline(&store, &provider);
    let untracked = add_process(&store, Uuid::new_v4(), CASE, None).await;
    let tracked = add_process(&store, Uuid::new_v4(), CASE, Some("trk-1")).await;

    assert!(matches!(
        pipeline.tracking_status(untracked.id).await,
        Err(PipelineError::Validation(_))
    ));
    let record = pipeline.tracking_status(tracked.id).await.unwrap();
    assert_eq!(record.tracking_id, "trk-1");
    assert!(store
        .sync_logs()
        .await
        .iter()
        .any(|l| l.endpoint == "GET /tracking" && l.success));
}

/// Memory store whose movement inserts start failing after `fail_after` successful calls.
struct FailingInserts {
    inner: MemoryProcessStore,
    fail_after: usize,
    inserts: AtomicUsize,
}

#[async_trait]
impl ProcessStore for FailingInserts {
    async fn insert_process(&self, new: NewTrackedProcess) -> anyhow::Result<TrackedProcess> {
        self.inner.insert_process(new).await
    }

    async fn get_process(&self, id: Uuid) -> anyhow::Result<Option<TrackedProcess>> {
        self.inner.get_process(id).await
    }

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> anyhow::Result<Option<TrackedProcess>> {
        self.inner.find_by_tracking_id(tracking_id).await
    }

    async fn list_sharing_case(
        &self,
        tenant_id: Uuid,
        case_number: &str,
    ) -> anyhow::Result<Vec<TrackedProcess>> {
        self.inner.list_sharing_case(tenant_id, case_number).await
    }

    async fn list_monitored(&self) -> anyhow::Result<Vec<TrackedProcess>> {
        self.inner.list_monitored().await
    }

    async fn set_request_id(&self, process_id: Uuid, request_id: &str) -> anyhow::Result<()> {
        self.inner.set_request_id(process_id, request_id).await
    }

    async fn set_monitoring(&self, process_id: Uuid, enabled: bool) -> anyhow::Result<bool> {
        self.inner.set_monitoring(process_id, enabled).await
    }

    async fn archive_process(&self, process_id: Uuid) -> anyhow::Result<bool> {
        self.inner.archive_process(process_id).await
    }

    async fn movement_keys(&self, process_id: Uuid) -> anyhow::Result<Vec<StoredMovementKey>> {
        self.inner.movement_keys(process_id).await
    }

    async fn insert_movement(&self, movement: NewMovement) -> anyhow::Result<bool> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
            anyhow::bail!("connection reset while inserting movement");
        }
        self.inner.insert_movement(movement).await
    }

    async fn list_movements(&self, process_id: Uuid) -> anyhow::Result<Vec<Movement>> {
        self.inner.list_movements(process_id).await
    }

    async fn record_sync(
        &self,
        process_id: Uuid,
        synced_at: DateTime<Utc>,
        new_unread: i64,
    ) -> anyhow::Result<()> {
        self.inner.record_sync(process_id, synced_at, new_unread).await
    }

    async fn mark_movements_read(&self, process_id: Uuid) -> anyhow::Result<u64> {
        self.inner.mark_movements_read(process_id).await
    }

    async fn append_sync_log(&self, entry: SyncLogEntry) -> anyhow::Result<()> {
        self.inner.append_sync_log(entry).await
    }

    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification> {
        self.inner.create_notification(new).await
    }
}

#[tokio::test]
async fn failed_insert_still_counts_rows_already_written() {
    let store = FailingInserts {
        inner: MemoryProcessStore::new(),
        fail_after: 4,
        inserts: AtomicUsize::new(0),
    };
    let tenant = Uuid::new_v4();
    let a = add_process(&store.inner, tenant, CASE, None).await;
    let b = add_process(&store.inner, tenant, CASE, None).await;

    let field_map = FieldMap::default();
    let ingestor = Ingestor::new(&store, &field_map);
    let batch = json!([
        { "step_date": "2024-01-05T10:00:00Z", "content": "Juntada de documento X" },
        { "step_date": "2024-01-08T14:30:00Z", "content": "Conclusos para despacho" },
        { "step_date": "2024-01-10T09:00:00Z", "content": "Audiencia designada" },
    ]);
    let (steps, received) = ingestor.map_steps([&batch]);
    let group = SharingGroup::resolve(&store, a.clone()).await.unwrap();

    let err = ingestor
        .ingest(&group, &steps, received, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Storage(_)));

    let a = store.get_process(a.id).await.unwrap().unwrap();
    assert_eq!(a.unread_count, 3);
    let b = store.get_process(b.id).await.unwrap().unwrap();
    assert_eq!(b.unread_count, 1);
    assert!(b.last_sync_at.is_some());
    assert_eq!(store.list_movements(b.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_tracking_id_wins_over_missing_items() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::default());
    add_process(&store, Uuid::new_v4(), CASE, Some("trk-known")).await;
    let pipeline = pipeline(&store, &provider);

    let unknown: WebhookPayload =
        serde_json::from_value(json!({ "tracking_id": "trk-missing" })).unwrap();
    assert!(matches!(
        pipeline.receive_webhook(unknown).await,
        Err(PipelineError::NotFound(_))
    ));

    let known_but_empty: WebhookPayload =
        serde_json::from_value(json!({ "tracking_id": "trk-known" })).unwrap();
    assert!(matches!(
        pipeline.receive_webhook(known_but_empty).await,
        Err(PipelineError::Validation(_))
    ));
}

#[tokio::test]
async fn archived_process_stops_syncing() {
    let store = Arc::new(MemoryProcessStore::new());
    let provider = Arc::new(FakeProvider::with_steps(one_step()));
    let pipeline = pipeline(&store, &provider);
    let process = add_process(&store, Uuid::new_v4(), CASE, None).await;

    pipeline.archive_process(process.id).await.unwrap();
    let row = store.get_process(process.id).await.unwrap().unwrap();
    assert_eq!(row.status, ProcessStatus::Archived);
    assert!(!row.monitoring_enabled);

    assert!(matches!(
        pipeline
            .sync_process(process.id, SyncOptions::default())
            .await,
        Err(PipelineError::Validation(_))
    ));
    assert_eq!(pipeline.sync_monitored().await.unwrap().groups, 0);
    assert_eq!(provider.search_count(), 0);
    assert!(matches!(
        pipeline.archive_process(Uuid::new_v4()).await,
        Err(PipelineError::NotFound(_))
    ));
}
