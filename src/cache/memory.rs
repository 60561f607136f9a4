//! Bounded in-process cache with recency eviction and TTL.

use super::{CacheError, ResultCache};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cached serialized record.
#[derive(Debug, Clone)]
struct CachedEntry {
    value: String,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Thread-safe LRU cache for analysis records.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    default_ttl: Duration,
}

impl MemoryCache {
    /// Create a new cache holding at most `max_entries` records.
    pub fn new(default_ttl_seconds: u64, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl: Duration::from_secs(default_ttl_seconds),
        }
    }

    /// Store a value with a custom TTL.
    pub fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::SaveFailure("cache lock poisoned".to_string()))?;

        entries.put(
            key.to_string(),
            CachedEntry {
                value,
                cached_at: Instant::now(),
                ttl,
            },
        );

        Ok(())
    }

    /// Remove expired entries.
    pub fn cleanup(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, v)| v.is_expired())
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                entries.pop(&key);
            }
        }
    }

    /// Number of entries currently held, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get_record(&self, key: &str) -> Result<String, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))?;

        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(),
            None => return Err(CacheError::RecordNotFound),
        };

        if expired {
            entries.pop(key);
            return Err(CacheError::RecordNotFound);
        }

        entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or(CacheError::RecordNotFound)
    }

    async fn set_record(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
