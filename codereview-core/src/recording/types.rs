use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One line of the recording log.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // RFC 3339
    pub correlation_id: String, // ties an inbound review to its model call
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String, // e.g. "POST /ai/getReview", "response_200"
    pub data: serde_json::Value,
    pub metadata: HashMap<String, String>,
}

impl RecordedEvent {
    pub fn now(
        correlation_id: &str,
        event_type: EventType,
        direction: Direction,
        operation: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.to_string(),
            event_type,
            direction,
            operation: operation.into(),
            data,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ReviewRequestReceived,
    ModelApiCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Correlation id carried in request extensions.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
