//! Read-through cache for schema records by ID
//!
//! An ID is bound to one piece of content for the lifetime of its context, so
//! cached records never go stale; the TTL only bounds memory held by entries
//! nobody asks for anymore.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::context::ContextName;
use crate::schema::{SchemaId, SchemaRecord};

/// Cache hit/miss counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Entry {
    record: SchemaRecord,
    inserted: Instant,
}

/// LRU cache of schema records keyed by `(context, id)`
pub struct SchemaCache {
    inner: Mutex<LruCache<(ContextName, SchemaId), Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SchemaCache {
    /// A zero capacity is bumped to one entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, context: &ContextName, id: SchemaId) -> Option<SchemaRecord> {
        let key = (context.clone(), id);
        let mut cache = self.inner.lock();
        let fresh = match cache.get(&key) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => Some(entry.record.clone()),
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        };
        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    pub fn insert(&self, context: &ContextName, record: SchemaRecord) {
        self.inner.lock().put(
            (context.clone(), record.id),
            Entry {
                record,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    fn record(n: u32) -> SchemaRecord {
        SchemaRecord::from_draft(SchemaId(n), &contract::record(n))
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = SchemaCache::new(4, Duration::from_secs(60));
        let ctx = ContextName::default_context();
        assert!(cache.get(&ctx, SchemaId(1)).is_none());
        cache.insert(&ctx, record(1));
        assert_eq!(cache.get(&ctx, SchemaId(1)).unwrap().id, SchemaId(1));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_keys_are_per_context() {
        let cache = SchemaCache::new(4, Duration::from_secs(60));
        cache.insert(&ContextName::default_context(), record(1));
        assert!(cache.get(&ContextName::parse(".other").unwrap(), SchemaId(1)).is_none());
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = SchemaCache::new(2, Duration::from_secs(60));
        let ctx = ContextName::default_context();
        cache.insert(&ctx, record(1));
        cache.insert(&ctx, record(2));
        cache.get(&ctx, SchemaId(1));
        cache.insert(&ctx, record(3));
        assert!(cache.get(&ctx, SchemaId(2)).is_none());
        assert!(cache.get(&ctx, SchemaId(1)).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = SchemaCache::new(2, Duration::ZERO);
        let ctx = ContextName::default_context();
        cache.insert(&ctx, record(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&ctx, SchemaId(1)).is_none());
        assert!(cache.is_empty());
    }
}
