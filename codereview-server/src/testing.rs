use async_trait::async_trait;
use codereview_core::{GenerativeModel, UpstreamError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records what it was asked and answers from a fixed outcome.
pub(crate) struct FakeModel {
    outcome: Result<String, UpstreamError>,
    delay: Duration,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeModel {
    pub fn answering(outcome: Result<String, UpstreamError>) -> Arc<Self> {
        Self::slow(outcome, Duration::ZERO)
    }

    pub fn slow(outcome: Result<String, UpstreamError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl GenerativeModel for FakeModel {
    async fn generate(
        &self,
        _correlation_id: Option<&str>,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<String, UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_instruction.to_string(), prompt.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }
}
