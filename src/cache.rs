//! TTL-aware cache layer with schema-versioned keys.

use crate::assessment::SCHEMA_VERSION;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared string key/value store with per-entry TTLs.
///
/// Implementations must convert their own failures into misses: the pipeline
/// proceeds without caching rather than failing a request over cache trouble.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the payload for `key` if present and unexpired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous entry wholesale.
    async fn put(&self, key: &str, value: String, ttl: Duration);
}

/// Cache key for an ingredient-list categorization (7-day tier).
///
/// Keyed by the content hash alone, independent of product code, so identical
/// ingredient lists across products reuse the entry.
pub fn categorization_key(content_hash: &str) -> String {
    format!("cat:v{SCHEMA_VERSION}:{content_hash}")
}

/// Cache key for one ingredient's verified citation set (30-day tier).
pub fn citation_key(ingredient: &str, claim: &str) -> String {
    format!(
        "cit:v{SCHEMA_VERSION}:{}|{}",
        ingredient.to_lowercase(),
        claim.trim().to_lowercase()
    )
}

/// Cache key for a full assessment (24-hour tier).
pub fn assessment_key(product_code: &str, content_hash: &str) -> String {
    format!("asmt:v{SCHEMA_VERSION}:{product_code}:{content_hash}")
}

struct CacheSlot {
    value: String,
    expires_at: Instant,
}

/// In-process LRU store with explicit expiry instants.
///
/// Last write wins on concurrent misses for the same key; redundant recompute
/// is tolerated rather than serialized.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, CacheSlot>>,
}

impl MemoryCache {
    /// Builds a store bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        match inner.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Some(slot.value.clone()),
            Some(_) => {
                // Expired entries are dropped on read; there is no sweeper.
                inner.pop(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        let slot = CacheSlot {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.lock().await.put(key.to_string(), slot);
    }
}
