//! LRU cache store and the cache persistence backends.
//!
//! Keys follow `{prefix}:{namespace}:{key values joined by ':'}`. The key
//! values are the model's shard-key fields when declared, primary-key
//! fields otherwise (unsharded cache models have no shard keys).

use crate::error::{TandemError, TandemResult};
use crate::record::{FacetKind, Record};
use crate::schema::ModelDef;
use crate::store::sql::{decode_payload, encode_payload};
use crate::store::{Persistable, WriteDisposition};
use crate::value::Row;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

struct CacheEntry {
    payload: String,
    expires_at: Option<Instant>,
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// LRU cache with optional per-entry TTL and hit/miss counters.
pub struct CacheStore {
    inner: Mutex<LruCache<String, CacheEntry>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl CacheStore {
    pub fn new(capacity: usize) -> TandemResult<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or_else(|| {
            TandemError::Configuration("cache capacity must be > 0".to_string())
        })?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(cap)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    /// Gets a payload; expired entries count as misses and are evicted.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.inner.lock();
        let expired = match cache.get(key) {
            Some(entry) => match entry.expires_at {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => {
                    self.hit_count.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.payload.clone());
                }
            },
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            cache.pop(key);
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: &str, payload: String, ttl: Option<Duration>) {
        let entry = CacheEntry {
            payload,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.inner.lock().put(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
        self.hit_count.store(0, Ordering::Relaxed);
        self.miss_count.store(0, Ordering::Relaxed);
    }
}

/// Cache facet backend. `ttl: None` is the plain variant, `Some` the TTL
/// variant (default 24 hours via settings).
pub struct CacheBackend {
    model: Arc<ModelDef>,
    store: Arc<CacheStore>,
    prefix: String,
    namespace: String,
    ttl: Option<Duration>,
}

impl CacheBackend {
    pub fn new(
        model: Arc<ModelDef>,
        store: Arc<CacheStore>,
        prefix: &str,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            model,
            store,
            prefix: prefix.to_string(),
            namespace: namespace.to_string(),
            ttl,
        }
    }

    fn key(&self, record: &Record) -> TandemResult<String> {
        let mut key = format!("{}:{}", self.prefix, self.namespace);
        for (name, value) in record.key_values() {
            if value.is_null() {
                return Err(TandemError::store(
                    "cache-key",
                    &self.model.name,
                    format!("key field '{name}' is unset"),
                ));
            }
            key.push(':');
            key.push_str(&value.key_segment()?);
        }
        Ok(key)
    }

    fn write(&self, record: &Record) -> TandemResult<WriteDisposition> {
        let key = self.key(record)?;
        let (values, version) = record.snapshot();
        let payload = encode_payload(&self.model, &values)?;
        self.store.put(&key, payload, self.ttl);
        trace!(model = %self.model.name, %key, "cache write");
        record.mark_facet_saved(FacetKind::Cache, values, version);
        Ok(WriteDisposition::Applied)
    }
}

impl Persistable for CacheBackend {
    fn create(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.write(record)
    }

    fn load(&self, record: &Record) -> TandemResult<Option<Row>> {
        let key = self.key(record)?;
        match self.store.get(&key) {
            Some(payload) => decode_payload(&self.model, &payload).map(Some),
            None => Ok(None),
        }
    }

    fn update(&self, record: &Record) -> TandemResult<WriteDisposition> {
        self.write(record)
    }

    fn remove(&self, record: &Record) -> TandemResult<()> {
        let key = self.key(record)?;
        self.store.remove(&key);
        record.mark_removed(FacetKind::Cache);
        Ok(())
    }
}
