//! Application state shared across handlers

use crate::cache::Cache;
use crate::config::Settings;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::RateLimiter;
use crate::sources::SourceRegistry;
use crate::tools::Tools;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Global settings
    pub settings: Arc<Settings>,
    /// Tool surface over the orchestrator
    pub tools: Tools,
    /// Process-wide cache, for stats
    pub cache: Arc<Cache>,
    /// Process-wide limiter, for stats
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Create new application state around the process-wide limiter and cache
    pub fn new(
        settings: Settings,
        registry: SourceRegistry,
        limiter: Arc<RateLimiter>,
        cache: Arc<Cache>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let orchestrator = Orchestrator::new(Arc::new(registry), limiter.clone())
            .with_metrics(metrics.clone());

        Self {
            settings: Arc::new(settings),
            tools: Tools::new(Arc::new(orchestrator)),
            cache,
            limiter,
            metrics,
        }
    }

    /// Get instance name
    pub fn instance_name(&self) -> &str {
        &self.settings.general.instance_name
    }
}
