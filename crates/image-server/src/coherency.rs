//! Source-vs-cache staleness checks

use image_engine::{CachePath, ImageEngine, ImageId, Result};
use tracing::debug;

/// A cached derivative is stale when the source is at least as new.
///
/// Equality counts: timestamps have one-second resolution, and a source
/// rewritten within the same second as the cache write must not be masked.
pub fn is_stale(source_timestamp: i64, cache_timestamp: i64) -> bool {
    source_timestamp >= cache_timestamp
}

/// Decide whether the cache entry at `cache_path` must be dropped before
/// serving. The caller has already confirmed the source exists.
pub async fn should_invalidate(
    engine: &dyn ImageEngine,
    id: &ImageId,
    cache_path: &CachePath,
) -> Result<bool> {
    if !engine.cache_exists(cache_path).await? {
        return Ok(false);
    }

    let source_timestamp = engine.source_timestamp(id).await?;
    let cache_timestamp = match engine.cache_timestamp(cache_path).await {
        Ok(ts) => ts,
        // Removed by a concurrent request since the existence check
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    };

    let stale = is_stale(source_timestamp, cache_timestamp);
    debug!(
        image = %id,
        cache_path = %cache_path,
        source_timestamp,
        cache_timestamp,
        stale,
        "Checked cache coherency"
    );
    Ok(stale)
}

/// Drop exactly one cache entry
pub async fn invalidate(engine: &dyn ImageEngine, cache_path: &CachePath) -> Result<()> {
    engine.delete_cache(cache_path).await
}
