use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

/// Label used to bound concurrency per provider endpoint (e.g. `requests`, `tracking`).
pub type EndpointLabel = &'static str;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_endpoint_concurrency: usize,
    /// Headers sent on every request (the provider's `api-key` lives here).
    pub default_headers: Vec<(String, String)>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_endpoint_concurrency: 4,
            default_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("transport is shutting down")]
    Closed,
}

/// Thin reqwest wrapper with global and per-endpoint concurrency limits.
///
/// Non-2xx responses are returned as [`FetchError::HttpStatus`] with the raw body and are
/// never retried here; retry policy belongs to whoever triggered the sync.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_endpoint_limit: usize,
    per_endpoint: Mutex<HashMap<EndpointLabel, Arc<Semaphore>>>,
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name}"))?;
            let mut value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid header value for {name}"))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_endpoint_limit: config.per_endpoint_concurrency.max(1),
            per_endpoint: Mutex::new(HashMap::new()),
        })
    }

    async fn endpoint_semaphore(&self, endpoint: EndpointLabel) -> Arc<Semaphore> {
        let mut map = self.per_endpoint.lock().await;
        map.entry(endpoint)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_endpoint_limit)))
            .clone()
    }

    pub async fn get_json(
        &self,
        endpoint: EndpointLabel,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let request = self.client.get(url).query(query);
        self.send(endpoint, "GET", url, request).await
    }

    pub async fn post_json(
        &self,
        endpoint: EndpointLabel,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        let request = self.client.post(url).json(body);
        self.send(endpoint, "POST", url, request).await
    }

    async fn send(
        &self,
        endpoint: EndpointLabel,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_endpoint = self.endpoint_semaphore(endpoint).await;
        let _endpoint = per_endpoint.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("provider_http", endpoint, method, url);
        async move {
            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let body = resp.bytes().await?.to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "provider responded");

            if status.is_success() {
                Ok(FetchedResponse {
                    status,
                    final_url,
                    body,
                })
            } else {
                Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                    body: String::from_utf8_lossy(&body).into_owned(),
                })
            }
        }
        .instrument(span)
        .await
    }
}
