//! Synchronization pipeline: request resolution, polling, dedup, ingestion and webhooks.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use casesync_core::{Movement, NewTrackedProcess, ProcessStatus, SyncLogEntry, TrackedProcess};
use casesync_provider::{FieldMap, JuditClient, ProviderApi, TrackingRecord};
use casesync_storage::{PgProcessStore, ProcessStore};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

mod config;
mod dedup;
mod error;
mod ingest;
mod poller;
mod resolver;
mod webhook;

pub use config::{ExpiredRequestPolicy, PipelineConfig, SyncConfig};
pub use dedup::{
    normalize_description, truncate_to_minute, DedupKey, Deduplicator, DESCRIPTION_PREFIX_CHARS,
};
pub use error::PipelineError;
pub use ingest::{FanOutReport, IngestReport, Ingestor};
pub use poller::{PollResult, Poller, PollerConfig};
pub use resolver::{CostSharingResolver, RequestOrigin, ResolvedRequest, SharingGroup};
pub use webhook::{DeliveryState, WebhookDelivery, WebhookPayload, WebhookReceipt};

pub const CRATE_NAME: &str = "casesync-sync";

/// Who asked for the sync; selects the poller budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncTrigger {
    #[default]
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub trigger: SyncTrigger,
    /// Skip cost sharing and always pay for a new search.
    pub force_new_request: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub process_id: Uuid,
    pub case_number: String,
    pub request: ResolvedRequest,
    pub poll_attempts: u32,
    pub inserted: usize,
    pub duplicates: usize,
    pub fan_out: FanOutReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub groups: usize,
    pub synced: usize,
    pub inserted: usize,
    pub failed: Vec<(Uuid, String)>,
}

/// Appends an audit row. A failing audit write is reported but never masks the
/// outcome of the call being audited.
pub(crate) async fn append_log(store: &dyn ProcessStore, entry: SyncLogEntry) {
    let endpoint = entry.endpoint.clone();
    if let Err(err) = store.append_sync_log(entry).await {
        warn!(%endpoint, error = %err, "failed to append sync log");
    }
}

pub struct SyncPipeline {
    store: Arc<dyn ProcessStore>,
    provider: Arc<dyn ProviderApi>,
    config: PipelineConfig,
    field_map: FieldMap,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        provider: Arc<dyn ProviderApi>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            field_map: FieldMap::default(),
        }
    }

    pub fn with_field_map(mut self, field_map: FieldMap) -> Self {
        self.field_map = field_map;
        self
    }

    pub fn store(&self) -> &dyn ProcessStore {
        self.store.as_ref()
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    async fn load_process(&self, process_id: Uuid) -> Result<TrackedProcess, PipelineError> {
        self.store
            .get_process(process_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("process {process_id}")))
    }

    /// Resolves a request id (reusing one from the sharing group when possible), polls it,
    /// and ingests the resulting movements into every row sharing the case number.
    pub async fn sync_process(
        &self,
        process_id: Uuid,
        options: SyncOptions,
    ) -> Result<SyncOutcome, PipelineError> {
        let process = self.load_process(process_id).await?;
        if process.case_number.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "process {process_id} has no case number"
            )));
        }
        if process.status == ProcessStatus::Archived {
            return Err(PipelineError::Validation(format!(
                "process {process_id} is archived"
            )));
        }

        let poller_config = match options.trigger {
            SyncTrigger::Manual => self.config.manual_poll,
            SyncTrigger::Scheduled => self.config.scheduled_poll,
        };

        let group = SharingGroup::resolve(self.store(), process).await?;
        let resolver = CostSharingResolver::new(self.store(), self.provider.as_ref());
        let request = resolver.resolve(&group, options.force_new_request).await?;

        let first_poll = self
            .poll_logged(&group.target, &request.request_id, poller_config)
            .await;
        let (request, polled) = match first_poll {
            Ok(polled) => (request, polled),
            Err(PipelineError::Timeout { .. })
                if request.is_reused()
                    && self.config.expired_request_policy == ExpiredRequestPolicy::FreshRequest =>
            {
                warn!(
                    case_number = group.case_number(),
                    stale_request_id = %request.request_id,
                    "shared request id produced nothing; paying for a fresh search"
                );
                let request_id = resolver.create_paid(&group.target).await?;
                let polled = self
                    .poll_logged(&group.target, &request_id, poller_config)
                    .await?;
                (
                    ResolvedRequest {
                        request_id,
                        origin: RequestOrigin::FallbackCreated,
                    },
                    polled,
                )
            }
            Err(err) => return Err(err),
        };

        let ingestor = Ingestor::new(self.store(), &self.field_map);
        let (steps, received) =
            ingestor.map_steps(polled.pages.iter().map(|page| &page.response_data));
        let fan_out = ingestor
            .ingest(&group, &steps, received, Utc::now())
            .await?;
        let (inserted, duplicates) = fan_out
            .for_process(group.target.id)
            .map(|r| (r.inserted, r.duplicates))
            .unwrap_or_default();

        info!(
            %process_id,
            case_number = group.case_number(),
            request_id = %request.request_id,
            inserted,
            duplicates,
            "process synced"
        );
        Ok(SyncOutcome {
            process_id,
            case_number: group.target.case_number.clone(),
            request,
            poll_attempts: polled.attempts,
            inserted,
            duplicates,
            fan_out,
        })
    }

    async fn poll_logged(
        &self,
        process: &TrackedProcess,
        request_id: &str,
        config: PollerConfig,
    ) -> Result<PollResult, PipelineError> {
        let result = Poller::new(self.provider.as_ref(), config)
            .poll(request_id)
            .await;
        let entry = match &result {
            Ok(polled) => SyncLogEntry::success(
                Some(process),
                "GET /responses",
                json!({
                    "request_id": request_id,
                    "attempts": polled.attempts,
                    "pages": polled.pages.len(),
                }),
            ),
            Err(err) => SyncLogEntry::failure(
                Some(process),
                "GET /responses",
                json!({ "request_id": request_id, "max_attempts": config.max_attempts }),
                err.to_string(),
            ),
        };
        append_log(self.store(), entry).await;
        result
    }

    /// Handles one inbound webhook delivery.
    pub async fn receive_webhook(
        &self,
        payload: WebhookPayload,
    ) -> Result<WebhookReceipt, PipelineError> {
        WebhookDelivery::new(payload).process(self).await
    }

    /// Syncs every monitored process once per sharing group. Failures are logged and
    /// collected; the sweep carries on.
    pub async fn sync_monitored(&self) -> Result<SweepSummary, PipelineError> {
        let monitored = self.store.list_monitored().await?;
        let mut seen = HashSet::new();
        let mut summary = SweepSummary::default();

        for process in monitored {
            if !seen.insert((process.tenant_id, process.case_number.clone())) {
                continue;
            }
            summary.groups += 1;
            let options = SyncOptions {
                trigger: SyncTrigger::Scheduled,
                force_new_request: false,
            };
            match self.sync_process(process.id, options).await {
                Ok(outcome) => {
                    summary.synced += 1;
                    summary.inserted += outcome.fan_out.total_inserted();
                }
                Err(err) => {
                    warn!(process_id = %process.id, error = %err, "scheduled sync failed");
                    summary.failed.push((process.id, err.to_string()));
                }
            }
        }

        info!(
            groups = summary.groups,
            synced = summary.synced,
            failed = summary.failed.len(),
            "monitoring sweep finished"
        );
        Ok(summary)
    }

    pub async fn tracking_status(&self, process_id: Uuid) -> Result<TrackingRecord, PipelineError> {
        let process = self.load_process(process_id).await?;
        let tracking_id = process
            .tracking_id
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Validation(format!("process {process_id} has no tracking id"))
            })?;

        let endpoint = "GET /tracking";
        match self.provider.get_tracking(&tracking_id).await {
            Ok(record) => {
                append_log(
                    self.store(),
                    SyncLogEntry::success(
                        Some(&process),
                        endpoint,
                        json!({ "tracking_id": tracking_id, "status": record.status }),
                    ),
                )
                .await;
                Ok(record)
            }
            Err(err) => {
                append_log(
                    self.store(),
                    SyncLogEntry::failure(
                        Some(&process),
                        endpoint,
                        json!({ "tracking_id": tracking_id }),
                        err.to_string(),
                    ),
                )
                .await;
                Err(err.into())
            }
        }
    }

    pub async fn import_process(
        &self,
        mut new: NewTrackedProcess,
    ) -> Result<TrackedProcess, PipelineError> {
        new.case_number = new.case_number.trim().to_string();
        if new.case_number.is_empty() {
            return Err(PipelineError::Validation("case_number is required".into()));
        }
        new.tracking_id = new
            .tracking_id
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let process = self.store.insert_process(new).await?;
        info!(process_id = %process.id, case_number = %process.case_number, "process imported");
        Ok(process)
    }

    /// Creates one process per non-blank case number.
    pub async fn bulk_import<I, S>(
        &self,
        tenant_id: Uuid,
        case_numbers: I,
        monitoring_enabled: bool,
    ) -> Result<Vec<TrackedProcess>, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut created = Vec::new();
        for case_number in case_numbers {
            let case_number = case_number.as_ref().trim();
            if case_number.is_empty() {
                continue;
            }
            created.push(
                self.import_process(NewTrackedProcess {
                    tenant_id,
                    case_number: case_number.to_string(),
                    tracking_id: None,
                    monitoring_enabled,
                })
                .await?,
            );
        }
        Ok(created)
    }

    pub async fn set_monitoring(&self, process_id: Uuid, enabled: bool) -> Result<(), PipelineError> {
        if self.store.set_monitoring(process_id, enabled).await? {
            Ok(())
        } else {
            Err(PipelineError::NotFound(format!("process {process_id}")))
        }
    }

    /// Archives a process. Its movements stay readable; it no longer syncs.
    pub async fn archive_process(&self, process_id: Uuid) -> Result<(), PipelineError> {
        if self.store.archive_process(process_id).await? {
            info!(%process_id, "process archived");
            Ok(())
        } else {
            Err(PipelineError::NotFound(format!("process {process_id}")))
        }
    }

    pub async fn list_movements(&self, process_id: Uuid) -> Result<Vec<Movement>, PipelineError> {
        self.load_process(process_id).await?;
        Ok(self.store.list_movements(process_id).await?)
    }

    pub async fn mark_read(&self, process_id: Uuid) -> Result<u64, PipelineError> {
        self.load_process(process_id).await?;
        Ok(self.store.mark_movements_read(process_id).await?)
    }
}

/// Connects to Postgres, applies migrations and wires the Judit client.
pub async fn pipeline_from_config(config: &SyncConfig) -> anyhow::Result<SyncPipeline> {
    let store = PgProcessStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let provider = JuditClient::new(config.judit()).context("building judit client")?;
    let field_map = match &config.field_map_path {
        Some(path) => FieldMap::load(path)?,
        None => FieldMap::default(),
    };
    Ok(
        SyncPipeline::new(Arc::new(store), Arc::new(provider), config.pipeline())
            .with_field_map(field_map),
    )
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    pipeline: Arc<SyncPipeline>,
) -> anyhow::Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            if let Err(err) = pipeline.sync_monitored().await {
                error!(error = %err, "monitoring sweep aborted");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests;
