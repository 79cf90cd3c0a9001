//! Source traits and types

use crate::error::{SourceError, SourceResult};
use crate::ratelimit::RateLimitStatus;
use crate::results::{BeneficialOwner, EnterpriseRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::error;

/// Longest body excerpt included in data-error logs
const LOG_EXCERPT_LEN: usize = 200;

/// Options for a search call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of records to return per source
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { max_results: 20 }
    }
}

impl SearchOptions {
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// Options for a details call; each flag enables one composed sub-call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailsOptions {
    pub include_financials: bool,
    pub include_intellectual_property: bool,
    pub include_beneficial_owners: bool,
}

impl DetailsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_financials(mut self) -> Self {
        self.include_financials = true;
        self
    }

    pub fn with_intellectual_property(mut self) -> Self {
        self.include_intellectual_property = true;
        self
    }

    pub fn with_beneficial_owners(mut self) -> Self {
        self.include_beneficial_owners = true;
        self
    }

    /// Stable string form used in cache keys
    pub fn cache_tag(&self) -> String {
        format!(
            "f{}ip{}bo{}",
            self.include_financials as u8,
            self.include_intellectual_property as u8,
            self.include_beneficial_owners as u8
        )
    }
}

/// Health report for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    /// Source name
    pub source: String,
    /// Whether the liveness probe succeeded
    pub available: bool,
    /// Probe round-trip time
    pub latency_ms: Option<u64>,
    /// Local admission state
    pub rate_limit: RateLimitStatus,
    /// Whether a valid credential lease is held (token sources only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    /// Human-readable detail when unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// HTTP request to be made by a source
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// URL to request
    pub url: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Query parameters
    pub params: Vec<(String, String)>,
    /// Request body
    pub data: Option<RequestBody>,
    /// Bearer token
    pub bearer: Option<String>,
    /// Basic credentials
    pub basic_auth: Option<(String, String)>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl SourceRequest {
    fn with_method(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HashMap::new(),
            params: Vec::new(),
            data: None,
            bearer: None,
            basic_auth: None,
            timeout: None,
        }
    }

    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::with_method(url, HttpMethod::Get)
    }

    /// Create a POST request
    pub fn post(url: impl Into<String>) -> Self {
        Self::with_method(url, HttpMethod::Post)
    }

    /// Add a header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a query parameter (repeatable)
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add form data
    pub fn form(mut self, data: HashMap<String, String>) -> Self {
        self.data = Some(RequestBody::Form(data));
        self
    }

    /// Add JSON body
    pub fn json(mut self, data: serde_json::Value) -> Self {
        self.data = Some(RequestBody::Json(data));
        self
    }

    /// Authenticate with a bearer token
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Authenticate with basic credentials
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Override the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Request body types
#[derive(Debug, Clone)]
pub enum RequestBody {
    Form(HashMap<String, String>),
    Json(serde_json::Value),
}

/// HTTP response from a source request
#[derive(Debug)]
pub struct SourceResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body as text
    pub text: String,
    /// Response URL (after redirects)
    pub url: String,
}

impl SourceResponse {
    /// Parse response as JSON; a schema mismatch is an upstream data error
    pub fn json<T: serde::de::DeserializeOwned>(&self, source: &str) -> SourceResult<T> {
        serde_json::from_str(&self.text).map_err(|e| {
            error!(
                "{}: unexpected response shape from {} ({}): {}",
                source,
                self.url,
                e,
                self.excerpt()
            );
            SourceError::UpstreamDataError(format!("{} returned an unexpected response", source))
        })
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classify the status: `Ok(true)` for data, `Ok(false)` for not found
    pub fn found(&self, source: &str) -> SourceResult<bool> {
        if self.is_success() {
            return Ok(true);
        }
        match SourceError::from_status(self.status, source) {
            None => Ok(false),
            Some(err) => {
                if matches!(err, SourceError::UpstreamDataError(_)) {
                    error!("{}: HTTP {} from {}: {}", source, self.status, self.url, self.excerpt());
                }
                Err(err)
            }
        }
    }

    fn excerpt(&self) -> String {
        self.text.chars().take(LOG_EXCERPT_LEN).collect()
    }
}

/// Source metadata
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceAbout {
    /// Website URL
    pub website: Option<String>,
    /// Whether an authenticated session is required
    pub require_credentials: bool,
    /// Capabilities beyond search/details/status
    pub extensions: Vec<String>,
}

impl SourceAbout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn website(mut self, url: impl Into<String>) -> Self {
        self.website = Some(url.into());
        self
    }

    pub fn credentials_required(mut self, required: bool) -> Self {
        self.require_credentials = required;
        self
    }

    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }
}

/// Capability set every registry source implements
#[async_trait]
pub trait Source: Send + Sync {
    /// Source name, the partition key for limiter state and cache keys
    fn name(&self) -> &str;

    /// Source metadata
    fn about(&self) -> SourceAbout {
        SourceAbout::default()
    }

    /// Search enterprises by name or identifier; no match is an empty list
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> SourceResult<Vec<EnterpriseRecord>>;

    /// Fetch one enterprise with optional composed sections; no match is `None`
    async fn get_details(
        &self,
        id: &str,
        options: &DetailsOptions,
    ) -> SourceResult<Option<EnterpriseRecord>>;

    /// Liveness probe plus limiter state; never fails
    async fn get_status(&self) -> SourceStatus;

    /// Beneficial owners of an enterprise (source-specific extension)
    async fn get_beneficial_owners(&self, _id: &str) -> SourceResult<Vec<BeneficialOwner>> {
        Err(SourceError::Unsupported(format!(
            "{} does not provide beneficial owners",
            self.name()
        )))
    }
}
