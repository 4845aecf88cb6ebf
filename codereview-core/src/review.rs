use serde::{Deserialize, Serialize};
use std::fmt;

/// Message shown when the user submits nothing but whitespace.
pub const EMPTY_CODE_MESSAGE: &str = "Please enter code to review.";

/// Instruction sent with every review unless the service is configured otherwise.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = include_str!("../prompt.txt");

/// Body of `POST /ai/getReview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub code: String,
}

impl ReviewRequest {
    /// Build a request, refusing code that is empty after trimming.
    pub fn new(code: impl Into<String>) -> Result<Self, ReviewResult> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(ReviewResult::failure(
                FailureKind::ValidationError,
                EMPTY_CODE_MESSAGE,
            ));
        }
        Ok(Self { code })
    }
}

/// Which side of the exchange a failed review is blamed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The input was rejected locally and never sent.
    ValidationError,
    /// The service could not be reached at all.
    TransportError,
    /// The service answered, but not with a usable review.
    ServerError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError => write!(f, "validation error"),
            Self::TransportError => write!(f, "transport error"),
            Self::ServerError => write!(f, "server error"),
        }
    }
}

/// Outcome of one user-triggered review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewResult {
    Success { text: String },
    Failure { kind: FailureKind, detail: String },
}

impl ReviewResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self::Success { text: text.into() }
    }

    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Render the result as markdown for display.
    ///
    /// Failures are shown inline as an error paragraph rather than being raised,
    /// so the caller always has something to render.
    pub fn to_markdown(&self) -> String {
        match self {
            Self::Success { text } => text.clone(),
            Self::Failure { detail, .. } => format!("**Error:** {}", detail),
        }
    }
}
