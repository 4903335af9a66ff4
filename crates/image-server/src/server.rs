//! HTTP server for the image endpoint
//!
//! Provides /health and `{prefix}/{*path}`.

use crate::body::ExactLength;
use crate::handler::{ImageHandler, ImageRequest, ServedImage};
use crate::signature;
use crate::types::HealthResponse;
use axum::{
    body::Body,
    extract::{OriginalUri, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Months, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

pub const CACHE_CONTROL_VALUE: &str = "max-age=31536000, public";

/// Shared state for the HTTP server
pub struct ServerState {
    pub handler: ImageHandler,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(handler: ImageHandler) -> Self {
        Self {
            handler,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Route pattern for the image endpoint under `prefix`
pub fn image_route(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        "/{*path}".to_string()
    } else {
        format!("/{}/{{*path}}", prefix)
    }
}

/// Create the HTTP router
pub fn create_router(state: SharedState, route_prefix: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&image_route(route_prefix), get(serve_image))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16, route_prefix: &str) -> std::io::Result<()> {
    let router = create_router(state, route_prefix);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: uptime_secs(state.started_at, Utc::now()),
        signing: state.handler.signing_enabled(),
        engine: state.handler.engine().stats(),
    })
}

/// Whole seconds since `started_at`, zero if the clock stepped backwards
fn uptime_secs(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started_at).num_seconds().max(0) as u64
}

/// Serve a (possibly transformed) image
async fn serve_image(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let query = signature::parse_query(uri.query());
    let request = ImageRequest {
        path: &path,
        url_path: uri.path(),
        query: &query,
    };

    match state.handler.handle(&request).await {
        Ok(served) => image_response(served, Utc::now()),
        Err(e) => e.into_response(),
    }
}

/// Assemble the 200 response around a derivative stream
pub fn image_response(served: ServedImage, now: DateTime<Utc>) -> Response {
    let ServedImage {
        stream,
        mimetype,
        size,
    } = served;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mimetype)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)
        .header(header::EXPIRES, expires_header(now))
        .body(Body::from_stream(ExactLength::new(stream, size)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// One year from `now` as an HTTP date
pub fn expires_header(now: DateTime<Utc>) -> String {
    let expires = now
        .checked_add_months(Months::new(12))
        .unwrap_or_else(|| now + Duration::days(365));
    expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
