//! Review service: validates the submitted code and forwards it to the model.
//!
//! The service never retries; retries are the client's job.

use codereview_core::{GenerativeModel, UpstreamError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Body of the 400 response.
pub const INVALID_INPUT_MESSAGE: &str = "Prompt is required";
/// Body of the 500 response. Upstream details are logged, never returned.
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Error generating review";

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    /// `code` was missing, not a string, or empty.
    InvalidInput,
    /// The model call failed or timed out.
    Upstream(UpstreamError),
}

impl fmt::Display for ReviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "a non-empty code string is required"),
            Self::Upstream(e) => write!(f, "upstream failure: {}", e),
        }
    }
}

impl std::error::Error for ReviewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidInput => None,
            Self::Upstream(e) => Some(e),
        }
    }
}

impl From<UpstreamError> for ReviewError {
    fn from(e: UpstreamError) -> Self {
        Self::Upstream(e)
    }
}

pub struct ReviewService {
    model: Arc<dyn GenerativeModel>,
    system_instruction: String,
    upstream_timeout: Duration,
}

impl ReviewService {
    pub fn new(model: Arc<dyn GenerativeModel>, system_instruction: impl Into<String>) -> Self {
        Self {
            model,
            system_instruction: system_instruction.into(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_upstream_timeout(mut self, upstream_timeout: Duration) -> Self {
        self.upstream_timeout = upstream_timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Generate a review of `code`, returning the model's text unmodified.
    ///
    /// `code` is `None` when the request carried no string under `code`.
    pub async fn generate_review(
        &self,
        correlation_id: Option<&str>,
        code: Option<&str>,
    ) -> Result<String, ReviewError> {
        let code = match code {
            Some(code) if !code.is_empty() => code,
            _ => return Err(ReviewError::InvalidInput),
        };

        info!(
            "Requesting review of {} bytes from {}",
            code.len(),
            self.model.model_name()
        );

        let generation = self
            .model
            .generate(correlation_id, &self.system_instruction, code);

        let text = match tokio::time::timeout(self.upstream_timeout, generation).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                error!("Review generation failed: {}", e);
                return Err(e.into());
            }
            Err(_) => {
                let e = UpstreamError::Timeout {
                    after: self.upstream_timeout,
                };
                error!("Review generation failed: {}", e);
                return Err(e.into());
            }
        };

        Ok(text)
    }
}
