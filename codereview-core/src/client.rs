//! Review client: submits code to the review service with bounded retry.
//!
//! A submission moves through `Idle -> Attempting(n) -> {Succeeded | Retrying ->
//! Attempting(n+1) | Failed}` with at most [`RetryPolicy::max_attempts`] attempts.
//! Every path ends in a [`ReviewResult`]; nothing is returned as an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::review::{FailureKind, ReviewRequest, ReviewResult};

/// Route served by the review service.
pub const REVIEW_PATH: &str = "/ai/getReview";

pub const TRANSPORT_FAILURE_MESSAGE: &str = "could not reach the service; verify it is running";
pub const EMPTY_RESPONSE_MESSAGE: &str = "empty response from server";
pub const SERVER_FAILURE_FALLBACK: &str = "Failed to generate review.";
pub const CANCELLED_MESSAGE: &str = "review cancelled";

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// No HTTP response was received (refused, reset, timed out).
    NoResponse { reason: String },
    /// The service answered with a non-2xx status.
    ErrorResponse { status: u16, body: String },
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse { reason } => write!(f, "no response: {}", reason),
            Self::ErrorResponse { status, body } => write!(f, "status {}: {}", status, body),
        }
    }
}

impl std::error::Error for AttemptError {}

/// Performs one attempt against the review service.
#[async_trait]
pub trait ReviewTransport: Send + Sync {
    /// Returns the response body of a 2xx answer.
    async fn send(&self, request: &ReviewRequest) -> Result<String, AttemptError>;
}

/// [`ReviewTransport`] speaking HTTP to `POST {base_url}/ai/getReview`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, None)
    }

    /// `timeout` bounds each attempt; an attempt that times out counts as no response.
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), REVIEW_PATH);
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("Invalid review service URL: {}", base_url))?;

        let mut builder =
            reqwest::Client::builder().user_agent(concat!("codereview/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ReviewTransport for HttpTransport {
    async fn send(&self, request: &ReviewRequest) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::NoResponse {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::ErrorResponse {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::NoResponse {
                reason: format!("failed to read response body: {}", e),
            })?;

        // The service may answer with a JSON string literal instead of plain text.
        if is_json {
            if let Ok(serde_json::Value::String(text)) = serde_json::from_str(&body) {
                return Ok(text);
            }
        }

        Ok(body)
    }
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (counted from 1): `2^attempt * base_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Observable progress of the current submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewPhase {
    Idle,
    Attempting { attempt: u32 },
    Retrying { next_attempt: u32, delay: Duration },
    Succeeded,
    Failed,
}

impl ReviewPhase {
    /// Whether an "in progress" indicator should be shown.
    pub fn in_progress(&self) -> bool {
        matches!(self, Self::Attempting { .. } | Self::Retrying { .. })
    }
}

pub struct ReviewClient<T = HttpTransport> {
    transport: T,
    policy: RetryPolicy,
    phase: watch::Sender<ReviewPhase>,
    /// Id of the most recent submission; only it may reset the phase on cancel.
    latest: AtomicU64,
}

impl ReviewClient<HttpTransport> {
    pub fn http(base_url: &str, policy: RetryPolicy) -> Result<Self> {
        Ok(Self::new(HttpTransport::new(base_url)?, policy))
    }
}

impl<T: ReviewTransport> ReviewClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        let (phase, _) = watch::channel(ReviewPhase::Idle);
        Self {
            transport,
            policy,
            phase,
            latest: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> watch::Receiver<ReviewPhase> {
        self.phase.subscribe()
    }

    /// Submit `code` for review, retrying failed attempts with exponential backoff.
    ///
    /// Cancelling `cancel` abandons the in-flight attempt or backoff wait.
    pub async fn submit_review(&self, code: &str, cancel: &CancellationToken) -> ReviewResult {
        let request = match ReviewRequest::new(code) {
            Ok(request) => request,
            Err(result) => {
                debug!("Refusing to submit blank code");
                return result;
            }
        };

        let submission = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;
            self.phase.send_replace(ReviewPhase::Attempting { attempt });

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(submission),
                result = self.transport.send(&request) => result,
            };

            match result {
                Ok(body) => break Ok(body),
                Err(err) if attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Review attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    self.phase.send_replace(ReviewPhase::Retrying {
                        next_attempt: attempt + 1,
                        delay,
                    });

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.cancelled(submission),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    warn!("Review attempt {}/{} failed ({})", attempt, max_attempts, err);
                    break Err(err);
                }
            }
        };

        let result = classify(outcome);
        match &result {
            ReviewResult::Success { text } => {
                info!("Review received after {} attempt(s), {} bytes", attempt, text.len());
                self.phase.send_replace(ReviewPhase::Succeeded);
            }
            ReviewResult::Failure { kind, detail } => {
                warn!("Review failed after {} attempt(s): {}: {}", attempt, kind, detail);
                self.phase.send_replace(ReviewPhase::Failed);
            }
        }
        result
    }

    fn cancelled(&self, submission: u64) -> ReviewResult {
        info!("Review submission cancelled");
        if self.latest.load(Ordering::SeqCst) == submission {
            self.phase.send_replace(ReviewPhase::Idle);
        }
        ReviewResult::failure(FailureKind::TransportError, CANCELLED_MESSAGE)
    }
}

/// Turn the final attempt's outcome into a displayable result.
fn classify(outcome: Result<String, AttemptError>) -> ReviewResult {
    match outcome {
        Ok(body) if body.is_empty() => {
            ReviewResult::failure(FailureKind::ServerError, EMPTY_RESPONSE_MESSAGE)
        }
        Ok(body) => ReviewResult::success(body),
        Err(AttemptError::NoResponse { .. }) => {
            ReviewResult::failure(FailureKind::TransportError, TRANSPORT_FAILURE_MESSAGE)
        }
        Err(AttemptError::ErrorResponse { status, body }) => {
            let body = if body.is_empty() {
                SERVER_FAILURE_FALLBACK
            } else {
                body.as_str()
            };
            ReviewResult::failure(FailureKind::ServerError, format!("{}: {}", status, body))
        }
    }
}

/// A client that only reports the result of its most recent submission.
///
/// Submitting again cancels the previous submission; a submission that
/// completes after being superseded yields `None`.
pub struct ReviewSession<T = HttpTransport> {
    client: ReviewClient<T>,
    generation: AtomicU64,
    current: Mutex<CancellationToken>,
}

impl<T: ReviewTransport> ReviewSession<T> {
    pub fn new(client: ReviewClient<T>) -> Self {
        Self {
            client,
            generation: AtomicU64::new(0),
            current: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReviewPhase> {
        self.client.subscribe()
    }

    pub async fn submit(&self, code: &str) -> Option<ReviewResult> {
        let token = CancellationToken::new();
        let generation = {
            let mut current = self.current.lock().await;
            current.cancel();
            *current = token.clone();
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let result = self.client.submit_review(code, &token).await;

        if self.generation.load(Ordering::SeqCst) == generation {
            Some(result)
        } else {
            debug!("Discarding result of superseded submission {}", generation);
            None
        }
    }

    /// Cancel whatever submission is in flight.
    pub async fn cancel(&self) {
        self.current.lock().await.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Replays scripted outcomes; the last one repeats forever.
    struct ScriptedTransport {
        script: std::sync::Mutex<VecDeque<Result<String, AttemptError>>>,
        calls: std::sync::Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<String, AttemptError>>) -> Self {
            Self {
                script: std::sync::Mutex::new(script.into()),
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl ReviewTransport for Arc<ScriptedTransport> {
        async fn send(&self, _request: &ReviewRequest) -> Result<String, AttemptError> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn refused() -> Result<String, AttemptError> {
        Err(AttemptError::NoResponse {
            reason: "connection refused".to_string(),
        })
    }

    fn status(status: u16, body: &str) -> Result<String, AttemptError> {
        Err(AttemptError::ErrorResponse {
            status,
            body: body.to_string(),
        })
    }

    fn client(transport: &Arc<ScriptedTransport>) -> ReviewClient<Arc<ScriptedTransport>> {
        ReviewClient::new(transport.clone(), RetryPolicy::default())
    }

    #[test]
    fn test_backoff_doubles_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(64), Duration::from_millis(1000) * u32::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_has_no_delay() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok("OK review".to_string())]));
        let start = Instant::now();

        let result = client(&transport)
            .submit_review("x", &CancellationToken::new())
            .await;

        assert_eq!(result, ReviewResult::success("OK review"));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_third_attempt_after_two_and_four_seconds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(500, "Error generating review"),
            refused(),
            Ok("Recovered".to_string()),
        ]));

        let result = client(&transport)
            .submit_review("fn main() {}", &CancellationToken::new())
            .await;

        assert_eq!(result, ReviewResult::success("Recovered"));
        assert_eq!(transport.call_count(), 3);
        assert_eq!(
            transport.gaps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_refused_gives_up_after_three_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![refused()]));

        let result = client(&transport)
            .submit_review("x", &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            ReviewResult::failure(FailureKind::TransportError, TRANSPORT_FAILURE_MESSAGE)
        );
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_server_error_reports_status_and_body() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            refused(),
            refused(),
            status(500, "Error generating review"),
        ]));

        let result = client(&transport)
            .submit_review("x", &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            ReviewResult::failure(FailureKind::ServerError, "500: Error generating review")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_without_body_uses_fallback() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(502, "")]));

        let result = client(&transport)
            .submit_review("x", &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            ReviewResult::failure(FailureKind::ServerError, "502: Failed to generate review.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_success_body_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(String::new())]));

        let result = client(&transport)
            .submit_review("x", &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            ReviewResult::failure(FailureKind::ServerError, EMPTY_RESPONSE_MESSAGE)
        );
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_waits() {
        let transport = Arc::new(ScriptedTransport::new(vec![refused()]));
        let client = ReviewClient::new(
            transport.clone(),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        );
        let start = Instant::now();

        let result = client.submit_review("x", &CancellationToken::new()).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::TransportError));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_reports_progress() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            refused(),
            Ok("done".to_string()),
        ]));
        let client = Arc::new(client(&transport));
        let mut phases = client.subscribe();
        assert_eq!(*phases.borrow(), ReviewPhase::Idle);

        let task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .submit_review("x", &CancellationToken::new())
                    .await
            })
        };

        let mut seen = Vec::new();
        while phases.changed().await.is_ok() {
            let phase = phases.borrow_and_update().clone();
            let finished = !phase.in_progress();
            seen.push(phase);
            if finished {
                break;
            }
        }

        assert_eq!(task.await.unwrap(), ReviewResult::success("done"));
        assert!(seen.contains(&ReviewPhase::Retrying {
            next_attempt: 2,
            delay: Duration::from_secs(2)
        }));
        assert_eq!(seen.last(), Some(&ReviewPhase::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let transport = Arc::new(ScriptedTransport::new(vec![refused()]));
        let client = client(&transport);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };

        let result = client.submit_review("x", &cancel).await;
        canceller.await.unwrap();

        assert_eq!(
            result,
            ReviewResult::failure(FailureKind::TransportError, CANCELLED_MESSAGE)
        );
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_makes_no_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok("never".to_string())]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client(&transport).submit_review("x", &cancel).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::TransportError));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_discards_superseded_result() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            refused(),
            Ok("second".to_string()),
        ]));
        let session = Arc::new(ReviewSession::new(client(&transport)));

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.submit("first").await })
        };
        // Let the first submission fail once and enter its backoff wait.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let second = session.submit("second").await;

        assert_eq!(first.await.unwrap(), None);
        assert_eq!(second, Some(ReviewResult::success("second")));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_submissions_are_independent() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok("same".to_string())]));
        let session = ReviewSession::new(client(&transport));

        let first = session.submit("fn f() {}").await;
        let second = session.submit("fn f() {}").await;

        assert_eq!(first, Some(ReviewResult::success("same")));
        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 2);
    }

    proptest! {
        #[test]
        fn blank_code_is_rejected_without_a_call(code in "[ \t\r\n]{0,32}") {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let transport = Arc::new(ScriptedTransport::new(vec![Ok("unused".to_string())]));

            let result = runtime.block_on(
                client(&transport).submit_review(&code, &CancellationToken::new()),
            );

            prop_assert_eq!(result.failure_kind(), Some(FailureKind::ValidationError));
            prop_assert_eq!(transport.call_count(), 0);
        }
    }
}
