use std::time::Duration;

use async_trait::async_trait;
use casesync_storage::{HttpClientConfig, HttpTransport};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{PollOutcome, ProviderApi, ProviderError, ResponsePage, TrackingRecord};

const RESPONSES_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct JuditConfig {
    /// Base URL of the requests/responses API, e.g. `https://requests.prod.judit.io`.
    pub requests_base_url: String,
    /// Base URL of the tracking API, e.g. `https://tracking.prod.judit.io`.
    pub tracking_base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

/// HTTP client for the Judit court-data API.
#[derive(Debug)]
pub struct JuditClient {
    transport: HttpTransport,
    requests_base_url: String,
    tracking_base_url: String,
}

#[derive(Deserialize)]
struct CreateRequestResponse {
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct ResponsesEnvelope {
    #[serde(default)]
    page_data: Vec<ResponsePage>,
}

impl JuditClient {
    pub fn new(config: JuditConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(HttpClientConfig {
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
            default_headers: vec![("api-key".to_string(), config.api_key.clone())],
            ..Default::default()
        })?;
        Ok(Self {
            transport,
            requests_base_url: config.requests_base_url.trim_end_matches('/').to_string(),
            tracking_base_url: config.tracking_base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn require(value: &str, what: &'static str) -> Result<(), ProviderError> {
    if value.trim().is_empty() {
        Err(ProviderError::InvalidInput(what))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ProviderApi for JuditClient {
    async fn create_search(&self, case_number: &str) -> Result<String, ProviderError> {
        require(case_number, "case number")?;
        let url = format!("{}/requests", self.requests_base_url);
        let body = json!({
            "search": {
                "search_type": "lawsuit_cnj",
                "search_key": case_number.trim(),
            }
        });

        info!(case_number, "creating billed provider search");
        let resp = self.transport.post_json("requests", &url, &body).await?;
        let parsed: CreateRequestResponse = serde_json::from_slice(&resp.body)?;
        parsed
            .request_id
            .filter(|id| !id.is_empty())
            .ok_or(ProviderError::MissingField("request_id"))
    }

    async fn poll_result(&self, request_id: &str) -> Result<PollOutcome, ProviderError> {
        require(request_id, "request id")?;
        let url = format!("{}/responses", self.requests_base_url);
        let resp = self
            .transport
            .get_json(
                "responses",
                &url,
                &[
                    ("request_id", request_id.to_string()),
                    ("page", "1".to_string()),
                    ("page_size", RESPONSES_PAGE_SIZE.to_string()),
                ],
            )
            .await?;
        let envelope: ResponsesEnvelope = serde_json::from_slice(&resp.body)?;
        if envelope.page_data.is_empty() {
            Ok(PollOutcome::Pending)
        } else {
            Ok(PollOutcome::Ready(envelope.page_data))
        }
    }

    async fn get_tracking(&self, tracking_id: &str) -> Result<TrackingRecord, ProviderError> {
        require(tracking_id, "tracking id")?;
        let url = format!("{}/tracking/{}", self.tracking_base_url, tracking_id.trim());
        let resp = self.transport.get_json("tracking", &url, &[]).await?;
        Ok(serde_json::from_slice(&resp.body)?)
    }
}
