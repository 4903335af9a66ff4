//! Per-key generation locks
//!
//! Holding the lock for a cache path around `make_image` keeps concurrent
//! identical requests from building the same derivative twice: the waiter
//! finds a fresh cache entry once it gets in.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle time after which an unused key's mutex is forgotten
const LOCK_IDLE_SECS: u64 = 300;
const MAX_TRACKED_KEYS: u64 = 100_000;

/// Held for the duration of one build. Dropping it releases the key.
pub struct KeyGuard {
    _guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
pub trait KeyLock: Send + Sync {
    async fn acquire(&self, key: &str) -> KeyGuard;
}

/// No locking at all: concurrent builds of one key may overlap
pub struct NoopKeyLock;

#[async_trait]
impl KeyLock for NoopKeyLock {
    async fn acquire(&self, _key: &str) -> KeyGuard {
        KeyGuard { _guard: None }
    }
}

/// In-process lock registry keyed by cache path
pub struct LocalKeyLock {
    locks: Cache<String, Arc<Mutex<()>>>,
}

impl LocalKeyLock {
    pub fn new() -> Self {
        Self {
            locks: Cache::builder()
                .max_capacity(MAX_TRACKED_KEYS)
                .time_to_idle(Duration::from_secs(LOCK_IDLE_SECS))
                .build(),
        }
    }
}

impl Default for LocalKeyLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyLock for LocalKeyLock {
    async fn acquire(&self, key: &str) -> KeyGuard {
        let lock = self
            .locks
            .get_with(key.to_string(), async { Arc::new(Mutex::new(())) })
            .await;
        KeyGuard {
            _guard: Some(lock.lock_owned().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let lock = Arc::new(LocalKeyLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = lock.acquire("photo.jpg/abc").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let lock = LocalKeyLock::new();
        let _a = lock.acquire("a").await;

        let b = timeout(Duration::from_secs(1), lock.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_guard_release_unblocks_waiter() {
        let lock = LocalKeyLock::new();
        let first = lock.acquire("a").await;

        assert!(timeout(Duration::from_millis(20), lock.acquire("a"))
            .await
            .is_err());

        drop(first);
        assert!(timeout(Duration::from_secs(1), lock.acquire("a"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_noop_lock_never_blocks() {
        let lock = NoopKeyLock;
        let _a = lock.acquire("a").await;
        assert!(timeout(Duration::from_millis(100), lock.acquire("a"))
            .await
            .is_ok());
    }
}
