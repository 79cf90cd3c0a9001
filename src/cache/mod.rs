//! Shared cache for source results and credential leases
//!
//! One instance is shared by every adapter. Keys are namespaced
//! `source:operation:normalized_args`, so adapters cannot collide.
//! The cache is advisory: a miss is never an error, callers fall back to
//! the live upstream call.

use moka::future::Cache as MokaCache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Arguments longer than this are hashed into the key
const MAX_ARG_LEN: usize = 128;

/// Reserved operation name for credential leases
pub const LEASE_OPERATION: &str = "__lease__";

#[derive(Clone)]
struct CachedValue {
    bytes: Arc<Vec<u8>>,
    ttl: Option<Duration>,
}

/// Per-entry expiry: each value carries its own TTL
struct EntryExpiry;

impl Expiry<String, CachedValue> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Aggregate cache statistics, for observability only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub key_count: u64,
    pub approx_key_size: u64,
    pub approx_value_size: u64,
}

/// Process-wide result cache
pub struct Cache {
    cache: MokaCache<String, CachedValue>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    /// Create a cache with a default TTL and a byte capacity bound
    pub fn new(default_ttl: Duration, max_capacity_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity_bytes)
            .weigher(|key: &String, value: &CachedValue| -> u32 {
                (key.len() + value.bytes.len())
                    .try_into()
                    .unwrap_or(u32::MAX)
            })
            .expire_after(EntryExpiry)
            .build();

        Self {
            cache,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a cached payload; expired entries read as a miss
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.cache.get(key).await {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {}", key);
                Some(value.bytes.as_ref().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: {}", key);
                None
            }
        }
    }

    /// Store a payload.
    ///
    /// `ttl = None` applies the process default TTL. `ttl = Some(Duration::ZERO)`
    /// keeps the entry until it is evicted by capacity pressure or deleted;
    /// it does NOT mean "expire immediately". A zero default TTL behaves the
    /// same way.
    pub async fn set(&self, key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self.cache
            .insert(
                key.into(),
                CachedValue {
                    bytes: Arc::new(value),
                    ttl,
                },
            )
            .await;
    }

    /// Get and deserialize a JSON payload.
    ///
    /// A payload that no longer deserializes is evicted and reported as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.delete(key).await;
                None
            }
        }
    }

    /// Serialize and store a JSON payload
    pub async fn set_json<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Option<Duration>) {
        let key = key.into();
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, bytes, ttl).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
    }

    /// Remove a cached payload
    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Clear the entire cache; hit and miss counters are kept
    pub async fn flush(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Current statistics
    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;

        let mut approx_key_size = 0u64;
        let mut approx_value_size = 0u64;
        let mut key_count = 0u64;
        for (key, value) in self.cache.iter() {
            key_count += 1;
            approx_key_size += key.len() as u64;
            approx_value_size += value.bytes.len() as u64;
        }

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            key_count,
            approx_key_size,
            approx_value_size,
        }
    }

    /// Process default TTL
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 64 * 1024 * 1024) // 1 hour TTL, 64 MiB
    }
}

/// Build a deterministic key from source, operation and arguments
pub fn cache_key(source: &str, operation: &str, args: &[&str]) -> String {
    let normalized: Vec<String> = args.iter().map(|arg| normalize_arg(arg)).collect();
    format!("{}:{}:{}", source, operation, normalized.join("|"))
}

/// Reserved key under which a source's credential lease is shared
pub fn lease_key(source: &str) -> String {
    format!("{}:{}", source, LEASE_OPERATION)
}

fn normalize_arg(arg: &str) -> String {
    let collapsed = arg
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if collapsed.len() > MAX_ARG_LEN {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(collapsed.as_bytes());
        format!("{:x}", hasher.finalize())
    } else {
        collapsed
    }
}
