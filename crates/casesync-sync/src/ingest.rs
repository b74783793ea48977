use casesync_core::NewMovement;
use casesync_provider::{FieldMap, MappedStep};
use casesync_storage::ProcessStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Deduplicator, PipelineError, SharingGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub process_id: Uuid,
    pub inserted: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub steps_received: usize,
    /// Steps without a usable date or description.
    pub skipped: usize,
    pub targets: Vec<IngestReport>,
}

impl FanOutReport {
    pub fn for_process(&self, process_id: Uuid) -> Option<&IngestReport> {
        self.targets.iter().find(|r| r.process_id == process_id)
    }

    pub fn total_inserted(&self) -> usize {
        self.targets.iter().map(|r| r.inserted).sum()
    }
}

pub struct Ingestor<'a> {
    store: &'a dyn ProcessStore,
    field_map: &'a FieldMap,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn ProcessStore, field_map: &'a FieldMap) -> Self {
        Self { store, field_map }
    }

    /// Flattens provider values into mapped steps; returns the steps and how many were seen.
    pub fn map_steps<'v>(&self, values: impl IntoIterator<Item = &'v JsonValue>) -> (Vec<MappedStep>, usize) {
        let raw = values
            .into_iter()
            .flat_map(|v| self.field_map.collect_steps(v))
            .collect::<Vec<_>>();
        let received = raw.len();
        let mapped = raw
            .iter()
            .filter_map(|step| self.field_map.map_step(step))
            .collect();
        (mapped, received)
    }

    /// Deduplicates and inserts `steps` into every member of `group`, then stamps each
    /// member's last sync and bumps its unread counter by what it received.
    ///
    /// Rows inserted before a failing write stay in place and are still counted on the
    /// member before the error is returned.
    pub async fn ingest(
        &self,
        group: &SharingGroup,
        steps: &[MappedStep],
        steps_received: usize,
        synced_at: DateTime<Utc>,
    ) -> Result<FanOutReport, PipelineError> {
        let mut targets = Vec::with_capacity(group.members.len());

        for member in &group.members {
            let existing = self.store.movement_keys(member.id).await?;
            let mut dedup = Deduplicator::from_existing(&existing);
            let mut report = IngestReport {
                process_id: member.id,
                inserted: 0,
                duplicates: 0,
            };

            let mut failed = None;
            for step in steps {
                let Some(key) = dedup.admit(step.movement_date, &step.description) else {
                    report.duplicates += 1;
                    continue;
                };
                let inserted = self
                    .store
                    .insert_movement(NewMovement {
                        process_id: member.id,
                        tenant_id: member.tenant_id,
                        movement_date: step.movement_date,
                        description: step.description.clone(),
                        raw_payload: step.raw.clone(),
                        dedup_hash: key.hash_hex(),
                    })
                    .await;
                match inserted {
                    Ok(true) => report.inserted += 1,
                    Ok(false) => report.duplicates += 1,
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                }
            }

            // The counter must match the rows that made it in, even when the batch stops early.
            self.store
                .record_sync(member.id, synced_at, report.inserted as i64)
                .await?;
            if let Some(err) = failed {
                warn!(
                    process_id = %member.id,
                    inserted = report.inserted,
                    error = %err,
                    "movement insert failed; keeping rows already written"
                );
                return Err(err.into());
            }
            targets.push(report);
        }

        let report = FanOutReport {
            steps_received,
            skipped: steps_received.saturating_sub(steps.len()),
            targets,
        };
        info!(
            case_number = group.case_number(),
            members = group.members.len(),
            received = report.steps_received,
            inserted = report.total_inserted(),
            "ingested movements"
        );
        Ok(report)
    }
}
