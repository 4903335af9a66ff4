//! In-memory engine that records every call, for handler and router tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use image_engine::{
    ByteStream, CachePath, EngineError, EngineStats, ImageEngine, ImageId, ParamResolver, Result,
    TransformParams,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct StubEngine {
    sources: Mutex<HashMap<String, i64>>,
    cache: Mutex<HashMap<String, (Vec<u8>, i64)>>,
    calls: Mutex<Vec<String>>,
    /// Timestamp given to freshly generated entries
    clock: AtomicI64,
    transforms: AtomicU64,
    /// When set, `make_image` fails with this decode error
    failure: Option<String>,
    /// Number of upcoming `cache_read_stream` calls that find the entry gone
    vanishing_reads: AtomicUsize,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            clock: AtomicI64::new(1_000),
            transforms: AtomicU64::new(0),
            failure: None,
            vanishing_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_source(self, id: &str, timestamp: i64) -> Self {
        self.sources
            .lock()
            .unwrap()
            .insert(id.to_string(), timestamp);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn vanishing_reads(self, count: usize) -> Self {
        self.vanishing_reads.store(count, Ordering::SeqCst);
        self
    }

    pub fn put_cache(&self, path: &CachePath, data: &[u8], timestamp: i64) {
        self.cache
            .lock()
            .unwrap()
            .insert(path.to_string(), (data.to_vec(), timestamp));
    }

    pub fn cache_entry(&self, path: &CachePath) -> Option<Vec<u8>> {
        self.cache
            .lock()
            .unwrap()
            .get(path.as_str())
            .map(|(data, _)| data.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn transforms(&self) -> u64 {
        self.transforms.load(Ordering::SeqCst)
    }

    /// Index of the first call with this name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == name)
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn entry(&self, path: &CachePath) -> Result<(Vec<u8>, i64)> {
        self.cache
            .lock()
            .unwrap()
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| EngineError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl ImageEngine for StubEngine {
    fn transform_params(&self, query: &[(String, String)]) -> TransformParams {
        ParamResolver::default().resolve(query)
    }

    fn cache_path(&self, id: &ImageId, params: &TransformParams) -> CachePath {
        CachePath::new(format!("{}/{}", id, params))
    }

    async fn source_exists(&self, id: &ImageId) -> Result<bool> {
        self.record("source_exists");
        Ok(self.sources.lock().unwrap().contains_key(id.as_str()))
    }

    async fn source_timestamp(&self, id: &ImageId) -> Result<i64> {
        self.record("source_timestamp");
        self.sources
            .lock()
            .unwrap()
            .get(id.as_str())
            .copied()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn cache_exists(&self, path: &CachePath) -> Result<bool> {
        self.record("cache_exists");
        Ok(self.cache.lock().unwrap().contains_key(path.as_str()))
    }

    async fn cache_timestamp(&self, path: &CachePath) -> Result<i64> {
        self.record("cache_timestamp");
        self.entry(path).map(|(_, ts)| ts)
    }

    async fn delete_cache(&self, path: &CachePath) -> Result<()> {
        self.record("delete_cache");
        self.cache.lock().unwrap().remove(path.as_str());
        Ok(())
    }

    async fn make_image(&self, id: &ImageId, params: &TransformParams) -> Result<CachePath> {
        self.record("make_image");
        let path = self.cache_path(id, params);
        if self.cache.lock().unwrap().contains_key(path.as_str()) {
            return Ok(path);
        }
        if let Some(message) = &self.failure {
            return Err(EngineError::Decode(message.clone()));
        }

        let n = self.transforms.fetch_add(1, Ordering::SeqCst) + 1;
        let data = format!("{}?{}#{}", id, params, n).into_bytes();
        self.put_cache(&path, &data, self.clock.load(Ordering::SeqCst));
        Ok(path)
    }

    async fn cache_mimetype(&self, path: &CachePath) -> Result<String> {
        self.record("cache_mimetype");
        self.entry(path).map(|_| "image/jpeg".to_string())
    }

    async fn cache_size(&self, path: &CachePath) -> Result<u64> {
        self.record("cache_size");
        self.entry(path).map(|(data, _)| data.len() as u64)
    }

    async fn cache_read_stream(&self, path: &CachePath) -> Result<ByteStream> {
        self.record("cache_read_stream");
        let vanished = self
            .vanishing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if vanished {
            // Another request deleted the entry after it was generated
            self.cache.lock().unwrap().remove(path.as_str());
            return Err(EngineError::NotFound(path.to_string()));
        }

        let (data, _) = self.entry(path)?;
        Ok(stream::once(async move { Ok(Bytes::from(data)) }).boxed())
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            generated: self.transforms(),
            ..Default::default()
        }
    }
}
