//! Image Server - resizes and serves images on the fly
//!
//! Derivatives are generated on first request, cached on disk and served
//! from the cache until the source image changes.

use image_engine::{FsImageEngine, DEFAULT_MAX_IMAGE_SIZE};
use image_server::error::{Result, ServerError};
use image_server::lock::{KeyLock, LocalKeyLock, NoopKeyLock};
use image_server::server::{start_server, ServerState, SharedState};
use image_server::{Config, ImageHandler};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("image_server=info".parse()?)
        .add_directive("image_engine=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting image server...");

    let config = Config::from_env()?;
    info!("Port: {}", config.port);
    info!("Source dir: {:?}", config.source_dir);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Route prefix: {}", config.route_prefix);
    info!(
        "Signed URLs: {}",
        if config.sign_key.is_some() { "required" } else { "disabled" }
    );
    info!(
        "Max image size: {} pixels",
        config.max_image_size.unwrap_or(DEFAULT_MAX_IMAGE_SIZE)
    );
    info!("Presets: {}", config.presets.len());

    let engine = FsImageEngine::new(
        config.source_dir.clone(),
        config.cache_dir.clone(),
        config.engine_options(),
    );
    engine.init().await?;

    let lock: Arc<dyn KeyLock> = if config.generation_lock {
        Arc::new(LocalKeyLock::new())
    } else {
        info!("Generation lock disabled");
        Arc::new(NoopKeyLock)
    };

    let handler = ImageHandler::new(Arc::new(engine), config.sign_key.clone(), lock);
    let state: SharedState = Arc::new(ServerState::new(handler));

    // Start HTTP server (blocking)
    start_server(state, config.port, &config.route_prefix)
        .await
        .map_err(|e| ServerError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
