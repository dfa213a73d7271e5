//! Bounded LRU cache of table reads.

use super::frame::Frame;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Entries kept per connection.
pub const CACHE_SIZE: usize = 64;

/// Identifies one read: the table plus the canonical JSON of its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub table: String,
    pub schema: Option<String>,
    pub request: String,
}

/// Shared LRU of frames. Hits hand back the same `Arc` that was stored.
#[derive(Debug)]
pub(crate) struct ResultCache {
    inner: Mutex<LruCache<CacheKey, Arc<Frame>>>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, Arc<Frame>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Frame>> {
        self.lock().get(key).cloned()
    }

    /// Stores `frame` unless a concurrent read already stored one for the
    /// same key, in which case that earlier frame is returned.
    pub fn insert(&self, key: CacheKey, frame: Arc<Frame>) -> Arc<Frame> {
        let mut cache = self.lock();
        if let Some(existing) = cache.get(&key) {
            return Arc::clone(existing);
        }
        cache.put(key, Arc::clone(&frame));
        frame
    }

    /// Drops every entry for `table`.
    pub fn invalidate_table(&self, table: &str, schema: Option<&str>) {
        let mut cache = self.lock();
        let stale: Vec<CacheKey> = cache
            .iter()
            .filter(|(key, _)| key.table == table && key.schema.as_deref() == schema)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CACHE_SIZE)
    }
}
