//! The operations an image request handler needs from an engine

use crate::error::Result;
use crate::params::TransformParams;
use crate::types::{ByteStream, CachePath, EngineStats, ImageId};
use async_trait::async_trait;

/// Owns source storage and cache storage.
///
/// Callers never touch the filesystem directly: existence checks,
/// timestamps, generation and reads all go through this trait.
/// Timestamps are seconds since the Unix epoch.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Build canonical transform parameters from raw query pairs
    fn transform_params(&self, query: &[(String, String)]) -> TransformParams;

    /// Where the derivative for `(id, params)` lives in cache storage
    fn cache_path(&self, id: &ImageId, params: &TransformParams) -> CachePath;

    async fn source_exists(&self, id: &ImageId) -> Result<bool>;

    async fn source_timestamp(&self, id: &ImageId) -> Result<i64>;

    async fn cache_exists(&self, path: &CachePath) -> Result<bool>;

    async fn cache_timestamp(&self, path: &CachePath) -> Result<i64>;

    /// Remove one cache entry. Removing an absent entry is not an error.
    async fn delete_cache(&self, path: &CachePath) -> Result<()>;

    /// Produce the derivative, or return the existing one untouched.
    async fn make_image(&self, id: &ImageId, params: &TransformParams) -> Result<CachePath>;

    async fn cache_mimetype(&self, path: &CachePath) -> Result<String>;

    async fn cache_size(&self, path: &CachePath) -> Result<u64>;

    async fn cache_read_stream(&self, path: &CachePath) -> Result<ByteStream>;

    fn stats(&self) -> EngineStats {
        EngineStats::default()
    }
}
