//! Response types for the image server

use image_engine::EngineStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub signing: bool,
    pub engine: EngineStats,
}
