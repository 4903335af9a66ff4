//! Local filesystem engine: a source directory and a derivative cache directory

use crate::engine::ImageEngine;
use crate::error::{EngineError, Result};
use crate::params::{OutputFormat, ParamResolver, Transform, TransformParams};
use crate::process;
use crate::types::{ByteStream, CachePath, EngineStats, ImageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

const MIME_SNIFF_LEN: usize = 64;
const FALLBACK_MIMETYPE: &str = "application/octet-stream";

/// Distinguishes temp files of concurrent writers within one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Engine behavior that is not tied to a storage location
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Largest allowed output area in pixels
    pub max_image_size: Option<u64>,
    /// Append the output format's extension to cache paths
    pub cache_with_file_extensions: bool,
    pub resolver: ParamResolver,
}

/// Image engine backed by two local directories
pub struct FsImageEngine {
    source_dir: PathBuf,
    cache_dir: PathBuf,
    options: EngineOptions,
    generated: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
    deleted: Arc<AtomicU64>,
}

impl FsImageEngine {
    pub fn new(source_dir: PathBuf, cache_dir: PathBuf, options: EngineOptions) -> Self {
        Self {
            source_dir,
            cache_dir,
            options,
            generated: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            deleted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Ensure the cache directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        if !fs::try_exists(&self.source_dir).await? {
            warn!(source_dir = ?self.source_dir, "Source directory does not exist yet");
        }
        info!(source_dir = ?self.source_dir, cache_dir = ?self.cache_dir, "Image engine initialized");
        Ok(())
    }

    /// Hash of the image identifier and its canonical parameters
    pub fn cache_key(id: &ImageId, params: &TransformParams) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}?{}", id, params).as_bytes());
        hex::encode(hasher.finalize())
    }

    fn source_file(&self, id: &ImageId) -> PathBuf {
        self.source_dir.join(id.as_str())
    }

    fn cache_file(&self, path: &CachePath) -> PathBuf {
        self.cache_dir.join(path.as_str())
    }

    fn cache_extension(id: &ImageId, params: &TransformParams) -> Option<String> {
        if let Some(format) = params.get("fm").and_then(|fm| fm.parse::<OutputFormat>().ok()) {
            return Some(format.extension().to_string());
        }
        Path::new(id.as_str())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Write through a temp file in the target directory, then rename, so
    /// readers never observe a partial entry.
    async fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("entry");
        let tmp = target.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// A missing file, or a path that runs through a regular file
fn is_absent(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
    )
}

fn not_found_or_io(err: std::io::Error, what: &str) -> EngineError {
    if is_absent(&err) {
        EngineError::NotFound(what.to_string())
    } else {
        err.into()
    }
}

async fn is_file(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if is_absent(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn modified_secs(path: &Path, what: &str) -> Result<i64> {
    let meta = fs::metadata(path)
        .await
        .map_err(|e| not_found_or_io(e, what))?;
    let modified: DateTime<Utc> = meta.modified()?.into();
    Ok(modified.timestamp())
}

#[async_trait]
impl ImageEngine for FsImageEngine {
    fn transform_params(&self, query: &[(String, String)]) -> TransformParams {
        self.options.resolver.resolve(query)
    }

    fn cache_path(&self, id: &ImageId, params: &TransformParams) -> CachePath {
        let key = Self::cache_key(id, params);
        let ext = if self.options.cache_with_file_extensions {
            Self::cache_extension(id, params)
        } else {
            None
        };

        match ext {
            Some(ext) => CachePath::new(format!("{}/{}.{}", id, key, ext)),
            None => CachePath::new(format!("{}/{}", id, key)),
        }
    }

    async fn source_exists(&self, id: &ImageId) -> Result<bool> {
        is_file(&self.source_file(id)).await
    }

    async fn source_timestamp(&self, id: &ImageId) -> Result<i64> {
        modified_secs(&self.source_file(id), id.as_str()).await
    }

    async fn cache_exists(&self, path: &CachePath) -> Result<bool> {
        is_file(&self.cache_file(path)).await
    }

    async fn cache_timestamp(&self, path: &CachePath) -> Result<i64> {
        modified_secs(&self.cache_file(path), path.as_str()).await
    }

    async fn delete_cache(&self, path: &CachePath) -> Result<()> {
        match fs::remove_file(self.cache_file(path)).await {
            Ok(()) => {
                self.deleted.fetch_add(1, Ordering::Relaxed);
                debug!(cache_path = %path, "Deleted cache entry");
                Ok(())
            }
            Err(e) if is_absent(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn make_image(&self, id: &ImageId, params: &TransformParams) -> Result<CachePath> {
        let cache_path = self.cache_path(id, params);

        if self.cache_exists(&cache_path).await? {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(image = %id, cache_path = %cache_path, "Cache hit");
            return Ok(cache_path);
        }

        let transform = Transform::try_from(params)?;
        let source = fs::read(self.source_file(id))
            .await
            .map_err(|e| not_found_or_io(e, id.as_str()))?;
        let max_image_size = self.options.max_image_size;

        let rendered = tokio::task::spawn_blocking(move || {
            process::render(&source, &transform, max_image_size)
        })
        .await??;

        Self::write_atomic(&self.cache_file(&cache_path), &rendered.data).await?;
        self.generated.fetch_add(1, Ordering::Relaxed);

        info!(
            image = %id,
            params = %params,
            cache_path = %cache_path,
            format = rendered.format.extension(),
            width = rendered.width,
            height = rendered.height,
            size = rendered.data.len(),
            "Generated derivative"
        );

        Ok(cache_path)
    }

    async fn cache_mimetype(&self, path: &CachePath) -> Result<String> {
        let mut file = fs::File::open(self.cache_file(path))
            .await
            .map_err(|e| not_found_or_io(e, path.as_str()))?;
        let mut head = vec![0u8; MIME_SNIFF_LEN];
        let n = file.read(&mut head).await?;

        Ok(image::guess_format(&head[..n])
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| FALLBACK_MIMETYPE.to_string()))
    }

    async fn cache_size(&self, path: &CachePath) -> Result<u64> {
        let meta = fs::metadata(self.cache_file(path))
            .await
            .map_err(|e| not_found_or_io(e, path.as_str()))?;
        Ok(meta.len())
    }

    async fn cache_read_stream(&self, path: &CachePath) -> Result<ByteStream> {
        let file = fs::File::open(self.cache_file(path))
            .await
            .map_err(|e| not_found_or_io(e, path.as_str()))?;
        Ok(ReaderStream::new(file).boxed())
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            generated: self.generated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
        }
    }
}
