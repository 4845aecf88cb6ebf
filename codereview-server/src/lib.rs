pub mod config;
pub mod routes;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use codereview_core::RecordingLogger;

pub use config::Config;
pub use service::{ReviewError, ReviewService};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_service_version() -> String {
    let git_hash = option_env!("CODEREVIEW_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match git_hash {
        Some(hash) => hash.chars().take(8).collect(),
        None => "unknown".to_string(),
    }
}

/// Shared, immutable state handed to every handler.
pub struct AppState {
    pub review_service: ReviewService,
    pub recording_logger: Option<RecordingLogger>,
}

/// The complete HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/help", get(routes::help_handler))
        .merge(routes::review_router(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
