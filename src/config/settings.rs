//! Settings structures for Registry-Hub configuration

use crate::ratelimit::RateLimitBudget;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main settings structure matching settings.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub outgoing: OutgoingSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub sources: Vec<SourceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            server: ServerSettings::default(),
            outgoing: OutgoingSettings::default(),
            rate_limit: RateLimitSettings::default(),
            cache: CacheSettings::default(),
            sources: default_sources(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content)?;
        Ok(settings)
    }

    /// Merge with environment variables
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("REGISTRY_HUB_DEBUG") {
            self.general.debug = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("REGISTRY_HUB_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("REGISTRY_HUB_BIND_ADDRESS") {
            self.server.bind_address = val;
        }

        for source in &mut self.sources {
            let creds = &mut source.credentials;
            match source.kind.as_str() {
                "insee" => {
                    env_override(&mut creds.client_id, "INSEE_CONSUMER_KEY");
                    env_override(&mut creds.client_secret, "INSEE_CONSUMER_SECRET");
                }
                "inpi" => {
                    env_override(&mut creds.username, "INPI_USERNAME");
                    env_override(&mut creds.password, "INPI_PASSWORD");
                }
                _ => {}
            }
        }
    }

    /// Get source config by name
    pub fn get_source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Get all enabled sources
    pub fn enabled_sources(&self) -> Vec<&SourceConfig> {
        self.sources.iter().filter(|s| !s.disabled).collect()
    }

    /// Effective budget for a source (its own, or the default)
    pub fn budget_for(&self, name: &str) -> RateLimitBudget {
        self.get_source(name)
            .and_then(|s| s.rate_limit.clone())
            .unwrap_or_else(|| self.rate_limit.default.clone())
    }
}

fn env_override(slot: &mut Option<String>, var: &str) {
    if let Ok(val) = std::env::var(var) {
        if !val.is_empty() {
            *slot = Some(val);
        }
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Enable debug mode
    pub debug: bool,
    /// Instance name reported by the status endpoint
    pub instance_name: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            debug: false,
            instance_name: "Registry-Hub".to_string(),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server port
    pub port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8888,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

/// Outgoing request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingSettings {
    /// Default request timeout in seconds
    pub request_timeout: f64,
    /// Maximum request timeout
    pub max_request_timeout: f64,
    /// Pool max size
    pub pool_maxsize: usize,
    /// Verify SSL certificates
    pub verify_ssl: bool,
    /// Proxy settings
    pub proxies: ProxySettings,
    /// Extra headers to send
    pub extra_headers: HashMap<String, String>,
}

impl Default for OutgoingSettings {
    fn default() -> Self {
        Self {
            request_timeout: 10.0,
            max_request_timeout: 30.0,
            pool_maxsize: 20,
            verify_ssl: true,
            proxies: ProxySettings::default(),
            extra_headers: HashMap::new(),
        }
    }
}

/// Proxy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
    pub all: Option<String>,
}

/// Rate limiting defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Budget applied to sources without their own
    pub default: RateLimitBudget,
}

/// Shared cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Process-wide default TTL in seconds
    pub default_ttl_secs: u64,
    /// Upper bound on approximate cached bytes (keys + values)
    pub max_capacity_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Credentials for providers that need them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Individual source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source name (unique identifier)
    pub name: String,
    /// Adapter implementation to use
    pub kind: String,
    /// Whether the source is disabled
    pub disabled: bool,
    /// Override of the provider's API base URL
    pub base_url: Option<String>,
    /// Override of the provider's authentication URL
    pub auth_url: Option<String>,
    /// Provider credentials
    pub credentials: Credentials,
    /// Upstream call timeout in seconds
    pub timeout: Option<f64>,
    /// Cache TTL for this source's results, in seconds (0 = until evicted)
    pub cache_ttl_secs: Option<u64>,
    /// Source rate budget
    pub rate_limit: Option<RateLimitBudget>,
    /// Display name
    pub display_name: Option<String>,
    /// Additional source-specific settings
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            disabled: false,
            base_url: None,
            auth_url: None,
            credentials: Credentials::default(),
            timeout: None,
            cache_ttl_secs: None,
            rate_limit: None,
            display_name: None,
            extra: HashMap::new(),
        }
    }
}

impl SourceConfig {
    /// Convenience constructor used by tests and defaults
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Cache TTL for this source, `None` meaning "use the cache default"
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Reject endpoint overrides that are not absolute http(s) URLs
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("base_url", &self.base_url), ("auth_url", &self.auth_url)] {
            if let Some(value) = value {
                let url = url::Url::parse(value)
                    .map_err(|e| anyhow::anyhow!("{}.{} is invalid: {}", self.name, field, e))?;
                if !matches!(url.scheme(), "http" | "https") {
                    anyhow::bail!("{}.{} must be http or https", self.name, field);
                }
            }
        }
        if let Some(timeout) = self.timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                anyhow::bail!("{}.timeout must be a positive number of seconds", self.name);
            }
            Duration::try_from_secs_f64(timeout)
                .map_err(|e| anyhow::anyhow!("{}.timeout is out of range: {}", self.name, e))?;
        }
        Ok(())
    }
}

/// Default source configurations
fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "insee".to_string(),
            kind: "insee".to_string(),
            cache_ttl_secs: Some(6 * 3600),
            rate_limit: Some(RateLimitBudget::new(2, 30, 1800)),
            display_name: Some("INSEE Sirene".to_string()),
            ..Default::default()
        },
        SourceConfig {
            name: "inpi".to_string(),
            kind: "inpi".to_string(),
            cache_ttl_secs: Some(24 * 3600),
            rate_limit: Some(RateLimitBudget::new(5, 120, 5000)),
            display_name: Some("INPI RNE".to_string()),
            ..Default::default()
        },
        SourceConfig {
            name: "recherche".to_string(),
            kind: "recherche".to_string(),
            cache_ttl_secs: Some(3600),
            rate_limit: Some(RateLimitBudget::new(7, 400, 20000)),
            display_name: Some("Recherche d'entreprises".to_string()),
            ..Default::default()
        },
    ]
}
