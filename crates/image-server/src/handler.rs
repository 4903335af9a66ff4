//! The image request state machine
//!
//! ```text
//! path ─▶ source exists? ─▶ cache stale? ─▶ signature ok? ─▶ make_image ─▶ open
//!             │ no              │ yes            │ no             │ err
//!             ▼                 ▼                ▼                ▼
//!          NotFound     delete that entry    BadRequest      Generation
//! ```
//!
//! The signature is only checked once the source is known to exist.

use crate::coherency;
use crate::error::ImageRequestError;
use crate::lock::KeyLock;
use crate::signature;
use image_engine::{ByteStream, CachePath, ImageEngine, ImageId, TransformParams};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Total `make_image` attempts when the entry disappears before it is read
pub const MAX_GENERATION_ATTEMPTS: usize = 3;

pub const WRONG_SIGNATURE: &str = "Wrong signature";

/// One incoming request, as the handler needs it
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    /// Route parameter naming the source image
    pub path: &'a str,
    /// Full request path as sent, used for signature checks
    pub url_path: &'a str,
    /// Decoded query pairs, in request order
    pub query: &'a [(String, String)],
}

/// A derivative ready to be streamed out
pub struct ServedImage {
    pub stream: ByteStream,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Clone)]
pub struct ImageHandler {
    engine: Arc<dyn ImageEngine>,
    sign_key: Option<String>,
    lock: Arc<dyn KeyLock>,
}

impl ImageHandler {
    /// An empty sign key disables signing, same as no key.
    pub fn new(engine: Arc<dyn ImageEngine>, sign_key: Option<String>, lock: Arc<dyn KeyLock>) -> Self {
        Self {
            engine,
            sign_key: sign_key.filter(|k| !k.is_empty()),
            lock,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ImageEngine> {
        &self.engine
    }

    pub fn signing_enabled(&self) -> bool {
        self.sign_key.is_some()
    }

    pub async fn handle(&self, request: &ImageRequest<'_>) -> Result<ServedImage, ImageRequestError> {
        let id = match ImageId::parse(request.path) {
            Ok(id) => id,
            Err(e) => {
                debug!(path = request.path, error = %e, "Rejected image path");
                return Err(ImageRequestError::NotFound);
            }
        };

        if !self
            .engine
            .source_exists(&id)
            .await
            .map_err(ImageRequestError::generation)?
        {
            debug!(image = %id, "Source image not found");
            return Err(ImageRequestError::NotFound);
        }

        let params = self.engine.transform_params(request.query);
        let cache_path = self.engine.cache_path(&id, &params);

        if coherency::should_invalidate(self.engine.as_ref(), &id, &cache_path)
            .await
            .map_err(ImageRequestError::generation)?
        {
            info!(image = %id, cache_path = %cache_path, "Source changed, invalidating cached derivative");
            coherency::invalidate(self.engine.as_ref(), &cache_path)
                .await
                .map_err(ImageRequestError::generation)?;
        }

        if !signature::validate(request.url_path, request.query, self.sign_key.as_deref()) {
            warn!(url_path = request.url_path, "Rejected request with wrong signature");
            return Err(ImageRequestError::BadRequest(WRONG_SIGNATURE.to_string()));
        }

        let mut attempt = 1;
        loop {
            let generated = self.generate(&id, &params, &cache_path).await?;

            match self.open(&generated).await {
                Ok(served) => return Ok(served),
                Err(e) if e.is_not_found() && attempt < MAX_GENERATION_ATTEMPTS => {
                    warn!(
                        image = %id,
                        cache_path = %generated,
                        attempt,
                        "Cache entry vanished before it could be served, regenerating"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(ImageRequestError::generation(e)),
            }
        }
    }

    async fn generate(
        &self,
        id: &ImageId,
        params: &TransformParams,
        cache_path: &CachePath,
    ) -> Result<CachePath, ImageRequestError> {
        let _guard = self.lock.acquire(cache_path.as_str()).await;
        self.engine
            .make_image(id, params)
            .await
            .map_err(ImageRequestError::generation)
    }

    /// The stream is opened first so an already-open file survives a
    /// concurrent delete; size and type are read after.
    async fn open(&self, path: &CachePath) -> image_engine::Result<ServedImage> {
        let stream = self.engine.cache_read_stream(path).await?;
        let size = self.engine.cache_size(path).await?;
        let mimetype = self.engine.cache_mimetype(path).await?;

        Ok(ServedImage {
            stream,
            mimetype,
            size,
        })
    }
}
