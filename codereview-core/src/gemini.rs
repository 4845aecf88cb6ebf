use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::model::{GenerativeModel, UpstreamError};
use crate::recording::{RecordingLogger, RecordingMiddleware, CORRELATION_ID_HEADER};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: ClientWithMiddleware,
    api_key: String,
    model: String,
    base_url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub system_instruction: Content,
}

impl GenerateContentRequest {
    /// Exactly one user message carrying `prompt`, plus the system instruction.
    pub fn single_turn(system_instruction: &str, prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts joined in order.
    ///
    /// Empty when the model produced nothing, e.g. a blocked prompt.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: &str) -> Result<Self> {
        Self::new_with_recording(api_key, model, base_url, None)
    }

    pub fn new_with_recording(
        api_key: String,
        model: String,
        base_url: &str,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid Gemini base URL: {}", base_url))?;
        let client = create_gemini_client(recording_logger)?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.as_str().trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(
        &self,
        correlation_id: Option<&str>,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<String, UpstreamError> {
        let request_body = GenerateContentRequest::single_turn(system_instruction, prompt);
        let body = serde_json::to_string(&request_body).map_err(|e| UpstreamError::Malformed {
            error: e.to_string(),
        })?;

        let mut request_builder = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .body(body);

        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }

        debug!("Sending {} bytes of code to {}", prompt.len(), self.model);

        let response = request_builder
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                error: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Gemini API error: {} - {}", status, body);
            return Err(UpstreamError::Status { status, body });
        }

        let parsed: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| UpstreamError::Malformed {
                    error: e.to_string(),
                })?;

        let text = parsed.text();
        if text.is_empty() {
            warn!("{} returned no text for the review prompt", self.model);
        } else {
            info!("Generated {} bytes of review with {}", text.len(), self.model);
        }

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the HTTP client used for model calls, with recording attached if enabled.
pub fn create_gemini_client(
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("codereview/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger));
    }

    Ok(builder.build())
}
