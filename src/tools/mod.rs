//! Boundary tools
//!
//! Thin request/response records over the orchestrator. Arguments are
//! validated here, before any source is invoked; everything past validation
//! is reported inside the envelope, never as a failure of the whole call.

use crate::error::SourceError;
use crate::orchestrator::{DetailsReport, Orchestrator, SearchReport, StatusReport};
use crate::query::{is_valid_identifier, ParsedQuery};
use crate::sources::{DetailsOptions, SearchOptions, SourceSelection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_MAX_RESULTS: usize = 20;
pub const MAX_RESULTS_LIMIT: usize = 100;

/// Rejected tool arguments
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("InvalidRequest: query must not be empty")]
    EmptyQuery,
    #[error("InvalidRequest: max_results must be between 1 and 100, got {0}")]
    MaxResultsOutOfRange(usize),
    #[error("InvalidRequest: '{0}' is not a 9-digit SIREN or a 14-digit SIRET")]
    InvalidIdentifier(String),
    #[error("InvalidRequest: unknown tool '{0}'")]
    UnknownTool(String),
    #[error("InvalidRequest: {0}")]
    InvalidArguments(String),
}

impl From<ToolError> for SourceError {
    fn from(e: ToolError) -> Self {
        let message = e.to_string();
        SourceError::InvalidRequest(
            message
                .strip_prefix("InvalidRequest: ")
                .unwrap_or(&message)
                .to_string(),
        )
    }
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

/// Arguments of `search_enterprises`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEnterprisesRequest {
    pub query: String,
    #[serde(default)]
    pub source: SourceSelection,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl SearchEnterprisesRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source: SourceSelection::All,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn validate(&self) -> Result<(), ToolError> {
        if ParsedQuery::parse(&self.query).is_empty() {
            return Err(ToolError::EmptyQuery);
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.max_results) {
            return Err(ToolError::MaxResultsOutOfRange(self.max_results));
        }
        Ok(())
    }
}

/// Arguments of `get_enterprise_details`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEnterpriseDetailsRequest {
    pub id: String,
    #[serde(default)]
    pub source: SourceSelection,
    #[serde(default)]
    pub include_financials: bool,
    #[serde(default)]
    pub include_intellectual_property: bool,
    #[serde(default)]
    pub include_beneficial_owners: bool,
}

impl GetEnterpriseDetailsRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: SourceSelection::All,
            include_financials: false,
            include_intellectual_property: false,
            include_beneficial_owners: false,
        }
    }

    pub fn validate(&self) -> Result<(), ToolError> {
        if !is_valid_identifier(&self.id) {
            return Err(ToolError::InvalidIdentifier(self.id.clone()));
        }
        Ok(())
    }

    fn options(&self) -> DetailsOptions {
        DetailsOptions {
            include_financials: self.include_financials,
            include_intellectual_property: self.include_intellectual_property,
            include_beneficial_owners: self.include_beneficial_owners,
        }
    }
}

/// Discriminated success/failure envelope returned by every tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ToolResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl<T> From<Result<T, ToolError>> for ToolResponse<T> {
    fn from(result: Result<T, ToolError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(e),
        }
    }
}

/// Tool metadata, for discovery
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The tool surface over one orchestrator
#[derive(Clone)]
pub struct Tools {
    orchestrator: Arc<Orchestrator>,
}

impl Tools {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Search enterprises by name, SIREN or SIRET
    pub async fn search_enterprises(
        &self,
        request: &SearchEnterprisesRequest,
    ) -> Result<SearchReport, ToolError> {
        request.validate()?;
        info!("search_enterprises '{}' ({:?})", request.query, request.source);

        let options = SearchOptions::default().with_max_results(request.max_results);
        Ok(self
            .orchestrator
            .search(&request.query, &request.source, &options)
            .await)
    }

    /// Full record of one enterprise from each selected source
    pub async fn get_enterprise_details(
        &self,
        request: &GetEnterpriseDetailsRequest,
    ) -> Result<DetailsReport, ToolError> {
        request.validate()?;
        info!("get_enterprise_details {} ({:?})", request.id, request.source);

        Ok(self
            .orchestrator
            .get_details(&request.id, &request.source, &request.options())
            .await)
    }

    /// Health of every configured source
    pub async fn get_api_status(&self) -> StatusReport {
        self.orchestrator.get_status().await
    }

    /// Dispatch a call by tool name with JSON arguments
    pub async fn call(&self, name: &str, arguments: Value) -> ToolResponse<Value> {
        let result = match name {
            "search_enterprises" => match parse_arguments::<SearchEnterprisesRequest>(arguments) {
                Ok(request) => self.search_enterprises(&request).await.map(|r| json!(r)),
                Err(e) => Err(e),
            },
            "get_enterprise_details" => {
                match parse_arguments::<GetEnterpriseDetailsRequest>(arguments) {
                    Ok(request) => self.get_enterprise_details(&request).await.map(|r| json!(r)),
                    Err(e) => Err(e),
                }
            }
            "get_api_status" => Ok(json!(self.get_api_status().await)),
            other => Err(ToolError::UnknownTool(other.to_string())),
        };
        result.into()
    }

    /// Descriptors of every tool
    pub fn descriptors() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "search_enterprises",
                description: "Search French enterprises by name, SIREN or SIRET across registries",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "source": {"type": "string", "default": "all"},
                        "max_results": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": MAX_RESULTS_LIMIT,
                            "default": DEFAULT_MAX_RESULTS
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolDescriptor {
                name: "get_enterprise_details",
                description: "Detailed record of one enterprise, optionally with financials, intellectual property and beneficial owners",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "description": "SIREN (9 digits) or SIRET (14 digits)"},
                        "source": {"type": "string", "default": "all"},
                        "include_financials": {"type": "boolean", "default": false},
                        "include_intellectual_property": {"type": "boolean", "default": false},
                        "include_beneficial_owners": {"type": "boolean", "default": false}
                    },
                    "required": ["id"]
                }),
            },
            ToolDescriptor {
                name: "get_api_status",
                description: "Availability and rate limit state of every registry",
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ]
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::SourceConfig;
    use crate::network::HttpClient;
    use crate::ratelimit::RateLimiter;
    use crate::sources::{Recherche, SourceContext, SourceRegistry};
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_search_validation() {
        assert_ok!(SearchEnterprisesRequest::new("danone").validate());
        assert_eq!(
            SearchEnterprisesRequest::new("   ").validate(),
            Err(ToolError::EmptyQuery)
        );

        let mut request = SearchEnterprisesRequest::new("danone");
        request.max_results = 0;
        assert_eq!(request.validate(), Err(ToolError::MaxResultsOutOfRange(0)));
        request.max_results = 101;
        assert_err!(request.validate());
        request.max_results = 100;
        assert_ok!(request.validate());
    }

    #[test]
    fn test_details_validation() {
        assert_ok!(GetEnterpriseDetailsRequest::new("552 032 534").validate());
        assert_ok!(GetEnterpriseDetailsRequest::new("55203253400014").validate());
        assert!(matches!(
            GetEnterpriseDetailsRequest::new("5520325").validate(),
            Err(ToolError::InvalidIdentifier(_))
        ));
        for id in ["\u{0660}".repeat(14), "\u{0967}".repeat(9)] {
            assert!(matches!(
                GetEnterpriseDetailsRequest::new(id).validate(),
                Err(ToolError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn test_request_defaults() {
        let request: SearchEnterprisesRequest =
            serde_json::from_value(json!({"query": "danone"})).unwrap();
        assert_eq!(request.source, SourceSelection::All);
        assert_eq!(request.max_results, DEFAULT_MAX_RESULTS);

        let request: GetEnterpriseDetailsRequest =
            serde_json::from_value(json!({"id": "552032534", "source": "inpi"})).unwrap();
        assert_eq!(request.source, SourceSelection::Named(vec!["inpi".to_string()]));
        assert!(!request.include_financials);
    }

    #[test]
    fn test_envelope_shape() {
        let ok = ToolResponse::ok(vec![1]);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": [1]})
        );

        let failed: ToolResponse<Vec<u32>> = ToolResponse::fail(ToolError::EmptyQuery);
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"success": false, "error": "InvalidRequest: query must not be empty"})
        );
    }

    #[test]
    fn test_tool_error_into_source_error() {
        let e: SourceError = ToolError::EmptyQuery.into();
        assert_eq!(e.to_string(), "InvalidRequest: query must not be empty");
    }

    async fn tools(server: &MockServer) -> Tools {
        let limiter = Arc::new(RateLimiter::default());
        let ctx = SourceContext::new(
            "recherche",
            limiter.clone(),
            Arc::new(Cache::default()),
            HttpClient::new().unwrap(),
        );
        let mut registry = SourceRegistry::new();
        registry.register(
            Arc::new(Recherche::new(ctx).with_base_url(server.uri())),
            SourceConfig::new("recherche", "recherche"),
        );
        Tools::new(Arc::new(Orchestrator::new(Arc::new(registry), limiter)))
    }

    #[tokio::test]
    async fn test_call_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"siren": "552032534", "nom_complet": "DANONE"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tools = tools(&server).await;
        let response = tools
            .call("search_enterprises", json!({"query": "danone", "source": "all"}))
            .await;
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data[0]["source"], "recherche");
        assert_eq!(data[0]["data"][0]["name"], "DANONE");

        // rejected before any source is called
        let response = tools
            .call("get_enterprise_details", json!({"id": "not-an-id"}))
            .await;
        assert!(!response.success);

        let response = tools.call("delete_everything", Value::Null).await;
        assert_eq!(
            response.error.as_deref(),
            Some("InvalidRequest: unknown tool 'delete_everything'")
        );
    }

    #[test]
    fn test_descriptors() {
        let names: Vec<&str> = Tools::descriptors().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["search_enterprises", "get_enterprise_details", "get_api_status"]
        );
    }
}
