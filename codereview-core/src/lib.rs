pub mod client;
pub mod gemini;
pub mod model;
pub mod recording;
pub mod review;

pub use client::{
    AttemptError, HttpTransport, RetryPolicy, ReviewClient, ReviewPhase, ReviewSession,
    ReviewTransport, REVIEW_PATH,
};
pub use gemini::{GeminiClient, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use model::{GenerativeModel, UpstreamError};
pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, RecordingLogger, RecordingMiddleware,
    Sanitizer, CORRELATION_ID_HEADER,
};
pub use review::*;
