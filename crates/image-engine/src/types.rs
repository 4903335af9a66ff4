//! Core types shared between the engine and its callers

use crate::error::{EngineError, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Readable byte stream over a cached derivative
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A normalized, relative path identifying a source image.
///
/// Construction rejects anything that could escape the storage root, so an
/// `ImageId` can be joined onto a root directory as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            return Err(EngineError::InvalidPath("path contains a NUL byte".to_string()));
        }
        if raw.contains('\\') {
            return Err(EngineError::InvalidPath(
                "path contains a backslash".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(EngineError::InvalidPath(format!(
                        "path traversal in '{}'",
                        raw
                    )))
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(EngineError::InvalidPath("path is empty".to_string()));
        }

        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a derivative inside cache storage, relative to the cache root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CachePath(String);

impl CachePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CachePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters exposed by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Derivatives produced by running a transform
    pub generated: u64,
    /// `make_image` calls answered by an existing cache entry
    pub cache_hits: u64,
    /// Cache entries removed through `delete_cache`
    pub deleted: u64,
}
