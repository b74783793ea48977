//! Court-data provider contract + the Judit HTTP client.

use async_trait::async_trait;
use casesync_storage::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod client;
mod extract;

pub use client::{JuditClient, JuditConfig};
pub use extract::{parse_provider_date, FieldChain, FieldMap, MappedStep};

pub const CRATE_NAME: &str = "casesync-provider";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("could not decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider response missing {0}")]
    MissingField(&'static str),
    #[error("{0} must not be empty")]
    InvalidInput(&'static str),
}

impl From<FetchError> for ProviderError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, body, .. } => ProviderError::Status { status, body },
            other => ProviderError::Transport(other.to_string()),
        }
    }
}

/// One entry of a search result page (`page_data[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePage {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub response_data: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The provider has not produced any page yet.
    Pending,
    Ready(Vec<ResponsePage>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub tracking_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub recurrence: Option<u32>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub search: JsonValue,
}

/// Request/response contract of the court-data provider.
///
/// `create_search` is billed; `poll_result` and `get_tracking` are free reads.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn create_search(&self, case_number: &str) -> Result<String, ProviderError>;

    async fn poll_result(&self, request_id: &str) -> Result<PollOutcome, ProviderError>;

    async fn get_tracking(&self, tracking_id: &str) -> Result<TrackingRecord, ProviderError>;
}
