//! Source loader for initializing adapters from configuration

use super::context::SourceContext;
use super::registry::SourceRegistry;
use super::traits::Source;
use super::{inpi, insee, recherche};
use crate::cache::Cache;
use crate::config::{Settings, SourceConfig};
use crate::network::HttpClient;
use crate::ratelimit::RateLimiter;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Loader for initializing sources from configuration
pub struct SourceLoader;

impl SourceLoader {
    /// Build every enabled source around the shared limiter, cache and client.
    ///
    /// A source that fails to initialise (typically missing credentials) is
    /// skipped with a warning; the others still load.
    pub fn load(
        settings: &Settings,
        limiter: Arc<RateLimiter>,
        cache: Arc<Cache>,
        client: HttpClient,
    ) -> Result<SourceRegistry> {
        let mut registry = SourceRegistry::new();

        for config in &settings.sources {
            if config.disabled {
                info!("Skipping disabled source: {}", config.name);
                continue;
            }

            if let Err(e) = config.validate() {
                warn!("Failed to load source {}: {}", config.name, e);
                continue;
            }

            limiter.set_budget(&config.name, settings.budget_for(&config.name));
            let ctx = SourceContext::new(&config.name, limiter.clone(), cache.clone(), client.clone())
                .configured(config);

            match Self::create_source(&config.kind, config, ctx) {
                Ok(source) => {
                    info!(
                        "Loaded source: {} ({})",
                        config.display_name.as_deref().unwrap_or(&config.name),
                        config.kind
                    );
                    registry.register(source, config.clone());
                }
                Err(e) => {
                    warn!("Failed to load source {}: {}", config.name, e);
                }
            }
        }

        info!("Loaded {} sources", registry.len());
        Ok(registry)
    }

    /// Create a source instance by kind
    fn create_source(kind: &str, config: &SourceConfig, ctx: SourceContext) -> Result<Arc<dyn Source>> {
        let source: Arc<dyn Source> = match kind {
            "insee" => Arc::new(insee::Insee::from_config(config, ctx)?),
            "inpi" => Arc::new(inpi::Inpi::from_config(config, ctx)?),
            "recherche" => Arc::new(recherche::Recherche::from_config(config, ctx)?),
            _ => {
                return Err(anyhow::anyhow!(
                    "Unknown source kind: {} (expected one of {})",
                    kind,
                    Self::available_sources().join(", ")
                ));
            }
        };
        Ok(source)
    }

    /// Get list of available source kinds
    pub fn available_sources() -> Vec<&'static str> {
        vec!["insee", "inpi", "recherche"]
    }
}
