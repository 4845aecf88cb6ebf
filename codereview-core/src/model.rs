//! Seam between the review service and whichever text-generation API backs it.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Reason a call to the generative model did not produce a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The request never completed (DNS, connection, TLS, body read).
    Transport { error: String },
    /// The model API answered with a non-success status.
    Status { status: u16, body: String },
    /// The response body did not match the expected shape.
    Malformed { error: String },
    /// No answer within the configured bound.
    Timeout { after: Duration },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { error } => write!(f, "model API request failed: {}", error),
            Self::Status { status, body } => {
                write!(f, "model API returned {}: {}", status, body)
            }
            Self::Malformed { error } => write!(f, "malformed model API response: {}", error),
            Self::Timeout { after } => {
                write!(f, "model API did not answer within {}s", after.as_secs())
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

/// A text-completion backend.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Generate text for a single user message under the given system instruction.
    ///
    /// `correlation_id` is forwarded to the HTTP layer so recorded calls can be
    /// tied back to the inbound request that caused them.
    async fn generate(
        &self,
        correlation_id: Option<&str>,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<String, UpstreamError>;

    /// Model identifier, for logs and `/help`.
    fn model_name(&self) -> &str;
}
