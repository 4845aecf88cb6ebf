use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use codereview_core::{
    CorrelationId, Direction, EventType, RecordedEvent, Sanitizer, CORRELATION_ID_HEADER,
    REVIEW_PATH,
};

use crate::service::{ReviewError, INVALID_INPUT_MESSAGE, UPSTREAM_FAILURE_MESSAGE};
use crate::AppState;

/// Largest request body accepted on the review route.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const PAYLOAD_TOO_LARGE_MESSAGE: &str = "Payload too large";

/// Tag each review request with a correlation id and record it if enabled.
async fn correlate_review_request(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let correlation_id = CorrelationId::generate();

    let Some(ref logger) = state.recording_logger else {
        request.extensions_mut().insert(correlation_id);
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, PAYLOAD_TOO_LARGE_MESSAGE).into_response(),
    };

    logger.record(RecordedEvent::now(
        &correlation_id.0,
        EventType::ReviewRequestReceived,
        Direction::Request,
        format!("{} {}", parts.method, parts.uri.path()),
        json!({
            "headers": Sanitizer::sanitize_headers(&parts.headers),
            "body": serde_json::from_slice::<Value>(&bytes)
                .map(|v| Sanitizer::sanitize_json(&v))
                .unwrap_or(Value::Null),
        }),
    ));

    let cid = correlation_id.0.clone();
    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(correlation_id);

    let response = next.run(request).await;

    logger.record(RecordedEvent::now(
        &cid,
        EventType::ReviewRequestReceived,
        Direction::Response,
        format!("response_{}", response.status().as_u16()),
        json!({ "status_code": response.status().as_u16() }),
    ));

    response
}

/// Only `application/json` bodies are parsed; anything else carries no code.
fn is_json_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Pull the `code` string out of a request body, if there is one.
fn extract_code(bytes: &[u8]) -> Option<String> {
    let payload: Value = serde_json::from_slice(bytes).ok()?;
    payload.get("code")?.as_str().map(str::to_string)
}

pub async fn get_review_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());
    let is_json = is_json_request(request.headers());

    let bytes: Bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, PAYLOAD_TOO_LARGE_MESSAGE).into_response(),
    };

    let code = if is_json { extract_code(&bytes) } else { None };

    match state
        .review_service
        .generate_review(correlation_id.as_deref(), code.as_deref())
        .await
    {
        Ok(review) => {
            info!("Returning review of {} bytes", review.len());
            let mut response = (StatusCode::OK, review).into_response();
            attach_correlation_id(response.headers_mut(), correlation_id.as_deref());
            response
        }
        Err(ReviewError::InvalidInput) => {
            warn!("Rejecting review request without code");
            (StatusCode::BAD_REQUEST, INVALID_INPUT_MESSAGE).into_response()
        }
        Err(ReviewError::Upstream(e)) => {
            error!(
                "Review failed (correlation id {}): {}",
                correlation_id.as_deref().unwrap_or("-"),
                e
            );
            (StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_FAILURE_MESSAGE).into_response()
        }
    }
}

fn attach_correlation_id(headers: &mut HeaderMap, correlation_id: Option<&str>) {
    if let Some(value) = correlation_id.and_then(|cid| cid.parse().ok()) {
        headers.insert(CORRELATION_ID_HEADER, value);
    }
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "codereview"
    }))
}

pub async fn help_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "codereview",
        "version": crate::get_service_version(),
        "model": state.review_service.model_name(),
        "description": "Forwards source code to a generative model and returns a markdown review",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "response_format": "application/json"
            },
            {
                "path": REVIEW_PATH,
                "method": "POST",
                "description": "Review the code in a {\"code\": \"...\"} body",
                "response_format": "text/plain (markdown)",
                "errors": {
                    "400": INVALID_INPUT_MESSAGE,
                    "500": UPSTREAM_FAILURE_MESSAGE
                }
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "response_format": "application/json"
            }
        ],
        "configuration": {
            "required_env_vars": ["GOOGLE_GEMINI_KEY"],
            "optional_env_vars": [
                "GEMINI_MODEL (default: gemini-2.5-flash)",
                "GEMINI_BASE_URL (default: https://generativelanguage.googleapis.com)",
                "PORT (default: 5000)",
                "SYSTEM_INSTRUCTION_PATH (default: built-in reviewer instruction)",
                "UPSTREAM_TIMEOUT_SECS (default: 30)",
                "RECORDING_ENABLED (default: false)",
                "RECORDING_LOG_PATH (default: recordings.jsonl)"
            ]
        }
    }))
}

pub fn review_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(REVIEW_PATH, post(get_review_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            correlate_review_request,
        ))
}
