use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};

use codereview_core::{GeminiClient, RecordingLogger};
use codereview_server::{app, AppState, Config, ReviewService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!(
        "Starting code review service {}",
        codereview_server::get_service_version()
    );

    let config =
        Config::from_env().context("Failed to load configuration from environment variables")?;

    let recording_logger = if config.recording_enabled {
        match RecordingLogger::new(config.recording_log_path.clone()) {
            Ok(logger) => {
                info!(
                    "Recording enabled, logging to: {}",
                    config.recording_log_path.display()
                );
                Some(logger)
            }
            Err(e) => {
                error!("Failed to initialize recording logger: {}", e);
                None
            }
        }
    } else {
        None
    };

    let gemini = GeminiClient::new_with_recording(
        config.gemini_api_key,
        config.gemini_model,
        &config.gemini_base_url,
        recording_logger.clone(),
    )?;
    let review_service = ReviewService::new(Arc::new(gemini), config.system_instruction)
        .with_upstream_timeout(config.upstream_timeout);
    info!("Using model {}", review_service.model_name());

    let state = Arc::new(AppState {
        review_service,
        recording_logger,
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
