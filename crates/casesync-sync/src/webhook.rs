use casesync_core::{NewNotification, SyncLogEntry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::{append_log, IngestReport, Ingestor, PipelineError, SharingGroup, SyncPipeline};

/// Push notification body: a tracking id plus movement-like items under `results` or `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub tracking_id: Option<String>,
    #[serde(default)]
    pub results: Option<JsonValue>,
    #[serde(default)]
    pub data: Option<JsonValue>,
}

impl WebhookPayload {
    fn items(&self) -> Option<&JsonValue> {
        self.results.as_ref().or(self.data.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub success: bool,
    #[serde(rename = "processosInseridos")]
    pub inserted: usize,
    #[serde(rename = "processosDuplicados")]
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Awaiting,
    /// Terminal.
    Ingested(WebhookReceipt),
}

/// One webhook delivery. Moves `Awaiting -> Ingested` at most once; failures leave it
/// awaiting and redelivery is up to the provider.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    payload: WebhookPayload,
    state: DeliveryState,
}

impl WebhookDelivery {
    pub fn new(payload: WebhookPayload) -> Self {
        Self {
            payload,
            state: DeliveryState::Awaiting,
        }
    }

    pub fn state(&self) -> &DeliveryState {
        &self.state
    }

    pub async fn process(
        &mut self,
        pipeline: &SyncPipeline,
    ) -> Result<WebhookReceipt, PipelineError> {
        if let DeliveryState::Ingested(receipt) = &self.state {
            return Ok(*receipt);
        }

        let tracking_id = self
            .payload
            .tracking_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::Validation("tracking_id is required".into()))?;
        let store = pipeline.store();
        let Some(process) = store.find_by_tracking_id(tracking_id).await? else {
            warn!(tracking_id, "webhook for unknown tracking id");
            append_log(
                store,
                SyncLogEntry::failure(
                    None,
                    "webhook",
                    json!({ "tracking_id": tracking_id }),
                    "unknown tracking id",
                ),
            )
            .await;
            return Err(PipelineError::NotFound(format!("tracking id {tracking_id}")));
        };
        let items = self
            .payload
            .items()
            .ok_or_else(|| PipelineError::Validation("results or data is required".into()))?;

        let group = SharingGroup::resolve(store, process).await?;
        let ingestor = Ingestor::new(store, pipeline.field_map());
        let (steps, received) = ingestor.map_steps([items]);
        let report = ingestor.ingest(&group, &steps, received, Utc::now()).await?;
        let own = report
            .for_process(group.target.id)
            .copied()
            .unwrap_or(IngestReport {
                process_id: group.target.id,
                inserted: 0,
                duplicates: 0,
            });

        append_log(
            store,
            SyncLogEntry::success(
                Some(&group.target),
                "webhook",
                json!({
                    "tracking_id": tracking_id,
                    "received": report.steps_received,
                    "inserted": own.inserted,
                    "duplicates": own.duplicates,
                }),
            ),
        )
        .await;

        if own.inserted > 0 {
            store
                .create_notification(NewNotification {
                    tenant_id: group.target.tenant_id,
                    process_id: Some(group.target.id),
                    title: "New case movements".to_string(),
                    body: format!(
                        "{} new movement(s) on case {}",
                        own.inserted, group.target.case_number
                    ),
                })
                .await?;
        }

        info!(
            tracking_id,
            inserted = own.inserted,
            duplicates = own.duplicates,
            "webhook ingested"
        );
        let receipt = WebhookReceipt {
            success: true,
            inserted: own.inserted,
            duplicates: own.duplicates,
        };
        self.state = DeliveryState::Ingested(receipt);
        Ok(receipt)
    }
}
