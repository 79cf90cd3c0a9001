//! Shared services and the per-call protocol every source follows

use super::traits::SourceRequest;
use crate::cache::{cache_key, Cache};
use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};
use crate::network::HttpClient;
use crate::ratelimit::{RateLimitStatus, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Upper bound on the liveness probe, whatever the source timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a liveness probe
#[derive(Debug, Clone)]
pub struct Probe {
    pub available: bool,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
}

/// Everything a source needs to talk to its provider.
///
/// The limiter and the cache are process-wide; the context only carries
/// handles to them plus this source's own settings.
#[derive(Clone)]
pub struct SourceContext {
    name: String,
    limiter: Arc<RateLimiter>,
    cache: Arc<Cache>,
    client: HttpClient,
    timeout: Duration,
    cache_ttl: Option<Duration>,
}

impl SourceContext {
    pub fn new(
        name: impl Into<String>,
        limiter: Arc<RateLimiter>,
        cache: Arc<Cache>,
        client: HttpClient,
    ) -> Self {
        let timeout = client.default_timeout();
        Self {
            name: name.into(),
            limiter,
            cache,
            client,
            timeout,
            cache_ttl: None,
        }
    }

    /// Apply the timeout and TTL of a source configuration
    pub fn configured(mut self, config: &SourceConfig) -> Self {
        if let Some(timeout) = config.timeout.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
            self = self.with_timeout(timeout);
        }
        self.cache_ttl = config.cache_ttl();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = self.client.clamp_timeout(timeout);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Namespaced cache key for one of this source's operations
    pub fn cache_key(&self, operation: &str, args: &[&str]) -> String {
        cache_key(&self.name, operation, args)
    }

    /// Run one upstream operation through cache, admission and timeout.
    ///
    /// A cache hit returns without touching the limiter or the provider.
    /// On a miss the caller waits for admission, `fetch` runs under the
    /// source timeout, and a successful result (including an empty one) is
    /// cached with the source TTL. Errors are never cached.
    pub async fn fetch_cached<T, F, Fut>(
        &self,
        operation: &str,
        args: &[&str],
        fetch: F,
    ) -> SourceResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let key = self.cache_key(operation, args);
        if let Some(cached) = self.cache.get_json::<T>(&key).await {
            return Ok(cached);
        }

        let admission = self.limiter.acquire(&self.name).await?;
        let start = Instant::now();
        let result = timeout(self.timeout, fetch()).await;
        drop(admission);

        let value = result.map_err(SourceError::from)??;
        debug!(
            "{} {} fetched in {:?}",
            self.name,
            operation,
            start.elapsed()
        );

        self.cache.set_json(key, &value, self.cache_ttl).await;
        Ok(value)
    }

    /// Send an authenticated-or-not request under the source timeout
    pub async fn send(&self, request: SourceRequest) -> SourceResult<super::SourceResponse> {
        self.client.execute(request.timeout(self.timeout)).await
    }

    /// Current limiter state for this source
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status(&self.name)
    }

    /// Lightweight reachability check; never consumes an admission
    pub async fn probe(&self, request: SourceRequest) -> Probe {
        let start = Instant::now();
        let deadline = self.timeout.min(PROBE_TIMEOUT);
        let result = self.client.execute(request.timeout(deadline)).await;
        let latency_ms = Some(start.elapsed().as_millis() as u64);

        match result {
            Ok(response) if response.status < 500 => Probe {
                available: true,
                latency_ms,
                message: None,
            },
            Ok(response) => Probe {
                available: false,
                latency_ms,
                message: Some(format!("HTTP {}", response.status)),
            },
            Err(e) => Probe {
                available: false,
                latency_ms: None,
                message: Some(e.to_string()),
            },
        }
    }
}
