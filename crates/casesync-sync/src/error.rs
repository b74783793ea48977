use casesync_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Non-2xx answer from the provider.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    /// The provider could not be reached or answered with something undecodable.
    #[error("provider unavailable: {0}")]
    Upstream(String),
    #[error("no results for request {request_id} after {attempts} poll attempts")]
    Timeout { request_id: String, attempts: u32 },
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<ProviderError> for PipelineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Status { status, body } => PipelineError::Provider { status, body },
            ProviderError::InvalidInput(what) => {
                PipelineError::Validation(format!("{what} must not be empty"))
            }
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}
