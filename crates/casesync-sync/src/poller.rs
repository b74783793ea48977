use std::time::Duration;

use casesync_provider::{PollOutcome, ProviderApi, ResponsePage};
use tracing::debug;

use crate::PipelineError;

/// Fixed-interval polling; no backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub pages: Vec<ResponsePage>,
    pub attempts: u32,
}

pub struct Poller<'a> {
    provider: &'a dyn ProviderApi,
    config: PollerConfig,
}

impl<'a> Poller<'a> {
    pub fn new(provider: &'a dyn ProviderApi, config: PollerConfig) -> Self {
        Self { provider, config }
    }

    /// Polls until the first non-empty page set. Partial results are final: later
    /// pages are never awaited. Provider errors end the loop immediately.
    pub async fn poll(&self, request_id: &str) -> Result<PollResult, PipelineError> {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.provider.poll_result(request_id).await? {
                PollOutcome::Ready(pages) => {
                    debug!(request_id, attempt, pages = pages.len(), "poll ready");
                    return Ok(PollResult {
                        pages,
                        attempts: attempt,
                    });
                }
                PollOutcome::Pending => {
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.interval).await;
                    }
                }
            }
        }
        Err(PipelineError::Timeout {
            request_id: request_id.to_string(),
            attempts: max_attempts,
        })
    }
}
