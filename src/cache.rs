//! Memoization with a whole-cache expiration window.
//!
//! [`TimedCache`] keeps at most `capacity` results (least-recently-used
//! eviction) and one expiration instant shared by every entry. The first
//! call at or after that instant clears the whole map and starts a new
//! window, so an entry inserted a second before expiry is dropped together
//! with one inserted at the start of the window. There is no per-key TTL.
//!
//! The expiry check, lookup, and insert each run under one mutex. The
//! computation itself runs outside the lock, so two concurrent misses on the
//! same key may both compute; the function being cached must be pure.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use crate::error::Result;

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    expires_at: Instant,
}

pub struct TimedCache<K: Hash + Eq, V> {
    window: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TimedCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create a cache whose first window ends `window` from now.
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                expires_at: Instant::now() + window,
            }),
        }
    }

    /// Return the cached value for `key`, or compute, store, and return it.
    ///
    /// Errors from `compute` are returned as-is and nothing is cached.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = self.lookup(&key) {
            tracing::debug!("timed cache hit");
            return Ok(hit);
        }

        let value = compute().await?;
        self.lock().entries.put(key, value.clone());
        Ok(value)
    }

    /// Number of live entries, after applying any pending expiry.
    pub fn len(&self) -> usize {
        let mut inner = self.lock();
        self.expire(&mut inner);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        self.expire(&mut inner);
        inner.entries.get(key).cloned()
    }

    fn expire(&self, inner: &mut Inner<K, V>) {
        let now = Instant::now();
        if now >= inner.expires_at {
            if !inner.entries.is_empty() {
                tracing::debug!(entries = inner.entries.len(), "timed cache window expired");
            }
            inner.entries.clear();
            inner.expires_at = now + self.window;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
