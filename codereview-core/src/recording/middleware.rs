use super::sanitizer::Sanitizer;
use super::types::{CorrelationId, CORRELATION_ID_HEADER};
use super::{Direction, EventType, RecordedEvent, RecordingLogger};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};

/// Bodies above this size are logged by length only.
const MAX_RECORDED_BODY: usize = 10_000;

/// Records every outbound model API call and its outcome.
pub struct RecordingMiddleware {
    logger: RecordingLogger,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger) -> Self {
        Self { logger }
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        // Header wins over extensions; anything unusable gets a fresh id.
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| extensions.get::<CorrelationId>().map(|id| id.0.clone()))
            .unwrap_or_else(|| CorrelationId::generate().0);

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        self.logger.record(RecordedEvent::now(
            &correlation_id,
            EventType::ModelApiCall,
            Direction::Request,
            format!("{} {}", req.method(), req.url().path()),
            serde_json::json!({
                "method": req.method().to_string(),
                "url": req.url().to_string(),
                "headers": Sanitizer::sanitize_headers(req.headers()),
                "body": describe_body(&req),
            }),
        ));

        let response = next.run(req, extensions).await;

        let event = match &response {
            Ok(resp) => RecordedEvent::now(
                &correlation_id,
                EventType::ModelApiCall,
                Direction::Response,
                format!("response_{}", resp.status().as_u16()),
                serde_json::json!({
                    "status_code": resp.status().as_u16(),
                    "headers": Sanitizer::sanitize_headers(resp.headers()),
                    "body_size": resp.content_length().unwrap_or(0),
                }),
            ),
            Err(err) => RecordedEvent::now(
                &correlation_id,
                EventType::ModelApiCall,
                Direction::Response,
                "error",
                serde_json::json!({ "error": err.to_string() }),
            ),
        };
        self.logger.record(event);

        response
    }
}

fn describe_body(req: &Request) -> serde_json::Value {
    let Some(body) = req.body() else {
        return serde_json::Value::Null;
    };
    let Some(bytes) = body.as_bytes() else {
        return serde_json::Value::String("[STREAM_BODY]".to_string());
    };
    if bytes.len() > MAX_RECORDED_BODY {
        return serde_json::Value::String(format!("[LARGE_BODY_{}b]", bytes.len()));
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => Sanitizer::sanitize_json(&json),
        Err(_) => match std::str::from_utf8(bytes) {
            Ok(text) => serde_json::Value::String(text.to_string()),
            Err(_) => serde_json::Value::String(format!("[BINARY_BODY_{}b]", bytes.len())),
        },
    }
}
