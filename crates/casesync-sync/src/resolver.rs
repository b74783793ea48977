use casesync_core::{SyncLogEntry, TrackedProcess};
use casesync_provider::ProviderApi;
use casesync_storage::ProcessStore;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{append_log, PipelineError};

/// The tracked processes of one tenant that reference the same case number.
///
/// Resolved once per sync; ingestion fans out to every member.
#[derive(Debug, Clone)]
pub struct SharingGroup {
    pub target: TrackedProcess,
    pub members: Vec<TrackedProcess>,
}

impl SharingGroup {
    pub async fn resolve(
        store: &dyn ProcessStore,
        target: TrackedProcess,
    ) -> Result<Self, PipelineError> {
        let mut members = store
            .list_sharing_case(target.tenant_id, &target.case_number)
            .await?;
        if !members.iter().any(|m| m.id == target.id) {
            members.insert(0, target.clone());
        }
        Ok(Self { target, members })
    }

    pub fn case_number(&self) -> &str {
        &self.target.case_number
    }

    /// A request id published by another member that the target has not consumed yet.
    ///
    /// The target's own id is never offered: its results were already ingested.
    pub fn published_request_id(&self) -> Option<(Uuid, &str)> {
        let consumed = self.target.last_request_id.as_deref();
        self.members
            .iter()
            .filter(|m| m.id != self.target.id)
            .find_map(|m| {
                m.last_request_id
                    .as_deref()
                    .filter(|id| Some(*id) != consumed)
                    .map(|id| (m.id, id))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RequestOrigin {
    /// Free path: an existing request id was found in the sharing group.
    Reused { from_process: Uuid },
    /// Billed search issued for this sync.
    Created,
    /// Billed search issued after a reused request id produced nothing.
    FallbackCreated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRequest {
    pub request_id: String,
    pub origin: RequestOrigin,
}

impl ResolvedRequest {
    pub fn is_reused(&self) -> bool {
        matches!(self.origin, RequestOrigin::Reused { .. })
    }
}

/// Reuses a published request id before paying for a new search. No TTL, no invalidation.
pub struct CostSharingResolver<'a> {
    store: &'a dyn ProcessStore,
    provider: &'a dyn ProviderApi,
}

impl<'a> CostSharingResolver<'a> {
    pub fn new(store: &'a dyn ProcessStore, provider: &'a dyn ProviderApi) -> Self {
        Self { store, provider }
    }

    pub async fn resolve(
        &self,
        group: &SharingGroup,
        force_new: bool,
    ) -> Result<ResolvedRequest, PipelineError> {
        if !force_new {
            if let Some((from_process, request_id)) = group.published_request_id() {
                info!(
                    case_number = group.case_number(),
                    request_id,
                    %from_process,
                    "reusing published request id"
                );
                self.store
                    .set_request_id(group.target.id, request_id)
                    .await?;
                return Ok(ResolvedRequest {
                    request_id: request_id.to_string(),
                    origin: RequestOrigin::Reused { from_process },
                });
            }
        }

        let request_id = self.create_paid(&group.target).await?;
        Ok(ResolvedRequest {
            request_id,
            origin: RequestOrigin::Created,
        })
    }

    /// Issues a billed search and publishes the id on the target row only.
    pub async fn create_paid(&self, target: &TrackedProcess) -> Result<String, PipelineError> {
        let payload = json!({ "case_number": target.case_number });
        match self.provider.create_search(&target.case_number).await {
            Ok(request_id) => {
                append_log(
                    self.store,
                    SyncLogEntry::success(
                        Some(target),
                        "POST /requests",
                        json!({ "case_number": target.case_number, "request_id": request_id }),
                    ),
                )
                .await;
                self.store.set_request_id(target.id, &request_id).await?;
                info!(case_number = %target.case_number, %request_id, "created billed search");
                Ok(request_id)
            }
            Err(err) => {
                append_log(
                    self.store,
                    SyncLogEntry::failure(Some(target), "POST /requests", payload, err.to_string()),
                )
                .await;
                Err(err.into())
            }
        }
    }
}
