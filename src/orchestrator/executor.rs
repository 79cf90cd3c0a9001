//! Fan-out/fan-in execution across sources

use super::models::{DetailsReport, SearchReport, StatusReport};
use crate::error::{SourceError, SourceResult};
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::results::{BeneficialOwner, PartialOutcome, SourceOutcome};
use crate::sources::{
    DetailsOptions, SearchOptions, Source, SourceRegistry, SourceSelection, SourceStatus,
};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Orchestrator that coordinates one request across multiple sources.
///
/// Each branch runs on its own task: a failing or panicking source yields an
/// error outcome for itself only, and a call abandoned by its caller still
/// completes and fills the cache. No caching or rate limiting happens here.
pub struct Orchestrator {
    /// Source registry
    registry: Arc<SourceRegistry>,
    /// Shared limiter, read when a status probe dies
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(registry: Arc<SourceRegistry>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            registry,
            limiter,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Record into an existing metrics collector
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Search every selected source; one outcome per source, in request order
    pub async fn search(
        &self,
        query: &str,
        selection: &SourceSelection,
        options: &SearchOptions,
    ) -> SearchReport {
        let span = info_span!("search", request_id = %Uuid::new_v4());
        async {
            self.metrics.inc_operation();

            let branches: Vec<_> = self
                .registry
                .resolve(selection)
                .into_iter()
                .map(|(name, source)| {
                    let query = query.to_string();
                    let options = options.clone();
                    self.branch(name, source, move |source| async move {
                        source.search(&query, &options).await
                    })
                })
                .collect();

            info!("Executing search '{}' on {} sources", query, branches.len());

            join_all(branches)
                .await
                .into_iter()
                .map(|(name, result)| PartialOutcome::from_result(name, result))
                .collect()
        }
        .instrument(span)
        .await
    }

    /// Look one enterprise up on every selected source
    pub async fn get_details(
        &self,
        id: &str,
        selection: &SourceSelection,
        options: &DetailsOptions,
    ) -> DetailsReport {
        let span = info_span!("details", request_id = %Uuid::new_v4());
        async {
            self.metrics.inc_operation();

            let branches: Vec<_> = self
                .registry
                .resolve(selection)
                .into_iter()
                .map(|(name, source)| {
                    let id = id.to_string();
                    let options = options.clone();
                    self.branch(name, source, move |source| async move {
                        source.get_details(&id, &options).await
                    })
                })
                .collect();

            info!("Fetching details of {} from {} sources", id, branches.len());

            join_all(branches)
                .await
                .into_iter()
                .map(|(name, result)| (name, SourceOutcome::from_lookup(result)))
                .collect()
        }
        .instrument(span)
        .await
    }

    /// Beneficial owners from every selected source that offers them
    pub async fn get_beneficial_owners(
        &self,
        id: &str,
        selection: &SourceSelection,
    ) -> Vec<PartialOutcome<Vec<BeneficialOwner>>> {
        let span = info_span!("beneficial_owners", request_id = %Uuid::new_v4());
        async {
            self.metrics.inc_operation();

            let branches: Vec<_> = self
                .registry
                .resolve(selection)
                .into_iter()
                .map(|(name, source)| {
                    let id = id.to_string();
                    self.branch(name, source, move |source| async move {
                        source.get_beneficial_owners(&id).await
                    })
                })
                .collect();

            join_all(branches)
                .await
                .into_iter()
                .map(|(name, result)| PartialOutcome::from_result(name, result))
                .collect()
        }
        .instrument(span)
        .await
    }

    /// Health of every registered source
    pub async fn get_status(&self) -> StatusReport {
        let checks: Vec<_> = self
            .registry
            .resolve(&SourceSelection::All)
            .into_iter()
            .filter_map(|(name, source)| source.map(|source| (name, source)))
            .map(|(name, source)| async move {
                match tokio::spawn(async move { source.get_status().await }).await {
                    Ok(status) => (name, status),
                    Err(e) => {
                        error!("Status probe for {} failed: {}", name, e);
                        let status = SourceStatus {
                            source: name.clone(),
                            available: false,
                            latency_ms: None,
                            rate_limit: self.limiter.status(&name),
                            authenticated: None,
                            message: Some("status probe failed unexpectedly".to_string()),
                        };
                        (name, status)
                    }
                }
            })
            .collect();

        join_all(checks).await.into_iter().collect()
    }

    /// Run one source call on its own task and record how it went
    async fn branch<T, F, Fut>(
        &self,
        name: String,
        source: Option<Arc<dyn Source>>,
        call: F,
    ) -> (String, SourceResult<T>)
    where
        F: FnOnce(Arc<dyn Source>) -> Fut,
        Fut: Future<Output = SourceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let Some(source) = source else {
            warn!("Unknown source requested: {}", name);
            let error = SourceError::InvalidRequest(format!("unknown source '{}'", name));
            return (name, Err(error));
        };

        let start = Instant::now();
        let result = match tokio::spawn(call(source).instrument(Span::current())).await {
            Ok(result) => result,
            Err(e) => {
                error!("Source {} task failed: {}", name, e);
                Err(SourceError::UpstreamDataError(format!(
                    "{} failed unexpectedly",
                    name
                )))
            }
        };
        let elapsed = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                debug!("Source {} answered in {}ms", name, elapsed);
                self.metrics.record_success(&name, elapsed);
            }
            Err(e) => {
                warn!("Source {} failed: {}", name, e);
                self.metrics.record_error(&name, e.kind(), elapsed);
            }
        }

        (name, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::SourceConfig;
    use crate::network::HttpClient;
    use crate::ratelimit::RateLimitBudget;
    use crate::results::EnterpriseRecord;
    use crate::sources::SourceContext;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    enum Behavior {
        Records(Vec<EnterpriseRecord>),
        Slow(Duration, Vec<EnterpriseRecord>),
        Fail(SourceError),
        Panic,
    }

    /// In-process source following the same cached protocol as real adapters
    struct MockSource {
        ctx: SourceContext,
        behavior: Behavior,
        upstream_calls: Arc<AtomicUsize>,
    }

    impl MockSource {
        async fn upstream(&self) -> SourceResult<Vec<EnterpriseRecord>> {
            self.upstream_calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Records(records) => Ok(records.clone()),
                Behavior::Slow(delay, records) => {
                    tokio::time::sleep(*delay).await;
                    Ok(records.clone())
                }
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Panic => panic!("adapter bug"),
            }
        }
    }

    #[async_trait]
    impl Source for MockSource {
        fn name(&self) -> &str {
            self.ctx.name()
        }

        async fn search(
            &self,
            query: &str,
            _options: &SearchOptions,
        ) -> SourceResult<Vec<EnterpriseRecord>> {
            self.ctx
                .fetch_cached("search", &[query], || self.upstream())
                .await
        }

        async fn get_details(
            &self,
            id: &str,
            _options: &DetailsOptions,
        ) -> SourceResult<Option<EnterpriseRecord>> {
            self.ctx
                .fetch_cached("details", &[id], || async {
                    Ok(self.upstream().await?.into_iter().find(|r| r.siren == id))
                })
                .await
        }

        async fn get_status(&self) -> SourceStatus {
            if matches!(self.behavior, Behavior::Panic) {
                panic!("probe bug");
            }
            SourceStatus {
                source: self.name().to_string(),
                available: !matches!(self.behavior, Behavior::Fail(_)),
                latency_ms: Some(1),
                rate_limit: self.ctx.rate_limit_status(),
                authenticated: None,
                message: None,
            }
        }
    }

    fn danone(source: &str) -> EnterpriseRecord {
        EnterpriseRecord::new("552032534", "DANONE", source)
    }

    fn orchestrator(sources: Vec<(&str, Behavior)>) -> (Orchestrator, HashMap<String, Arc<AtomicUsize>>) {
        let limiter = Arc::new(RateLimiter::new(RateLimitBudget::new(100, 10_000, 1_000_000)));
        let cache = Arc::new(Cache::default());
        let client = HttpClient::new().unwrap();

        let mut registry = SourceRegistry::new();
        let mut counters = HashMap::new();
        for (name, behavior) in sources {
            let upstream_calls = Arc::new(AtomicUsize::new(0));
            counters.insert(name.to_string(), upstream_calls.clone());
            let source = MockSource {
                ctx: SourceContext::new(name, limiter.clone(), cache.clone(), client.clone()),
                behavior,
                upstream_calls,
            };
            registry.register(Arc::new(source), SourceConfig::new(name, "mock"));
        }

        (Orchestrator::new(Arc::new(registry), limiter), counters)
    }

    fn named(names: &[&str]) -> SourceSelection {
        SourceSelection::Named(names.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_partial_failure_scenario() {
        let (orchestrator, _) = orchestrator(vec![
            ("A", Behavior::Records(vec![danone("A")])),
            (
                "B",
                Behavior::Fail(SourceError::NetworkOrTimeout("connection refused".to_string())),
            ),
        ]);

        let report = orchestrator
            .search("552032534", &named(&["A", "B"]), &SearchOptions::default())
            .await;

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!([
                {"source": "A", "data": [serde_json::to_value(danone("A")).unwrap()]},
                {"source": "B", "error": "NetworkOrTimeout: connection refused"}
            ])
        );

        let stats = orchestrator.metrics().snapshot();
        assert_eq!(stats.sources["B"].errors["network_or_timeout"], 1);
        assert_eq!(stats.sources["A"].reliability, 100.0);
    }

    #[tokio::test]
    async fn test_one_failure_among_many() {
        let mut sources = Vec::new();
        let names = ["s0", "s1", "s2", "s3", "s4"];
        for (i, name) in names.iter().enumerate() {
            let behavior = if i == 2 {
                Behavior::Fail(SourceError::UpstreamDataError("bad payload".to_string()))
            } else {
                Behavior::Records(vec![danone(name)])
            };
            sources.push((*name, behavior));
        }
        let (orchestrator, _) = orchestrator(sources);

        let report = orchestrator
            .search("danone", &SourceSelection::All, &SearchOptions::default())
            .await;

        assert_eq!(report.len(), names.len());
        assert_eq!(report.iter().filter(|o| o.is_error()).count(), 1);
        assert!(report[2].is_error());
        for outcome in report.iter().filter(|o| !o.is_error()) {
            assert_eq!(outcome.as_data().unwrap(), &vec![danone(outcome.source())]);
        }
    }

    #[tokio::test]
    async fn test_order_follows_request_not_completion() {
        let (orchestrator, _) = orchestrator(vec![
            ("slow", Behavior::Slow(Duration::from_millis(200), vec![danone("slow")])),
            ("fast", Behavior::Records(vec![danone("fast")])),
        ]);

        let report = orchestrator
            .search("danone", &named(&["slow", "fast"]), &SearchOptions::default())
            .await;
        let order: Vec<&str> = report.iter().map(|o| o.source()).collect();
        assert_eq!(order, vec!["slow", "fast"]);

        let report = orchestrator
            .search("danone", &named(&["fast", "slow"]), &SearchOptions::default())
            .await;
        let order: Vec<&str> = report.iter().map(|o| o.source()).collect();
        assert_eq!(order, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_repeated_search_is_served_from_cache() {
        let (orchestrator, counters) =
            orchestrator(vec![("A", Behavior::Records(vec![danone("A")]))]);
        let selection = named(&["A"]);
        let options = SearchOptions::default();

        let first = orchestrator.search("Danone", &selection, &options).await;
        let second = orchestrator.search("danone ", &selection, &options).await;

        assert_eq!(first, second);
        assert_eq!(counters["A"].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_details_are_byte_identical() {
        let (orchestrator, counters) =
            orchestrator(vec![("A", Behavior::Records(vec![danone("A")]))]);
        let selection = named(&["A"]);
        let options = DetailsOptions::new();

        let first = orchestrator.get_details("552032534", &selection, &options).await;
        let second = orchestrator.get_details("552032534", &selection, &options).await;

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert!(first["A"].found().is_some());
        assert_eq!(counters["A"].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_details_merge_is_exhaustive() {
        let (orchestrator, _) = orchestrator(vec![
            ("found", Behavior::Records(vec![danone("found")])),
            ("missing", Behavior::Records(vec![])),
            (
                "broken",
                Behavior::Fail(SourceError::AuthenticationFailed("bad credentials".to_string())),
            ),
        ]);

        let report = orchestrator
            .get_details("552032534", &SourceSelection::All, &DetailsOptions::new())
            .await;

        assert_eq!(report.len(), 3);
        assert!(matches!(report["found"], SourceOutcome::Found { .. }));
        assert_eq!(report["missing"], SourceOutcome::NotFound);
        assert!(report["broken"].is_error());
        assert_eq!(
            serde_json::to_value(&report["missing"]).unwrap(),
            json!({"status": "not_found"})
        );
    }

    #[tokio::test]
    async fn test_unknown_source_is_an_error_outcome() {
        let (orchestrator, _) = orchestrator(vec![("A", Behavior::Records(vec![danone("A")]))]);

        let report = orchestrator
            .search("danone", &named(&["nope", "A"]), &SearchOptions::default())
            .await;

        assert_eq!(report.len(), 2);
        assert_eq!(report[0].source(), "nope");
        assert!(report[0].as_error().unwrap().starts_with("InvalidRequest"));
        assert!(!report[1].is_error());
    }

    #[tokio::test]
    async fn test_panicking_source_is_isolated() {
        let (orchestrator, _) = orchestrator(vec![
            ("bug", Behavior::Panic),
            ("ok", Behavior::Records(vec![danone("ok")])),
        ]);

        let report = orchestrator
            .search("danone", &SourceSelection::All, &SearchOptions::default())
            .await;
        assert!(report[0].is_error());
        assert_eq!(report[1].as_data().unwrap().len(), 1);

        let status = orchestrator.get_status().await;
        assert!(!status["bug"].available);
        assert!(status["ok"].available);
    }

    #[tokio::test]
    async fn test_beneficial_owners_unsupported() {
        let (orchestrator, _) = orchestrator(vec![("A", Behavior::Records(vec![]))]);

        let report = orchestrator
            .get_beneficial_owners("552032534", &SourceSelection::All)
            .await;
        assert!(report[0].as_error().unwrap().starts_with("Unsupported"));
    }
}
