//! HTTP request handlers
//!
//! Every tool answers with the envelope: 200 once arguments are valid, even
//! when some sources failed, and 400 when the request itself is rejected.

use super::state::AppState;
use crate::cache::CacheStats;
use crate::metrics::MetricsSnapshot;
use crate::ratelimit::RateLimitStatus;
use crate::tools::{
    GetEnterpriseDetailsRequest, SearchEnterprisesRequest, ToolDescriptor, ToolError,
    ToolResponse, Tools,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wrap a tool result into the envelope and the matching status code
fn respond<T: Serialize>(result: Result<T, ToolError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ToolResponse::ok(data))).into_response(),
        Err(e) => {
            tracing::debug!("Rejected tool call: {}", e);
            (StatusCode::BAD_REQUEST, Json(ToolResponse::<()>::fail(e))).into_response()
        }
    }
}

fn arguments<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ToolError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ToolError::InvalidArguments(e.body_text()))
}

/// `search_enterprises` handler
pub async fn search_enterprises(
    State(state): State<AppState>,
    payload: Result<Json<SearchEnterprisesRequest>, JsonRejection>,
) -> Response {
    let result = match arguments(payload) {
        Ok(request) => state.tools.search_enterprises(&request).await,
        Err(e) => Err(e),
    };
    respond(result)
}

/// `get_enterprise_details` handler
pub async fn get_enterprise_details(
    State(state): State<AppState>,
    payload: Result<Json<GetEnterpriseDetailsRequest>, JsonRejection>,
) -> Response {
    let result = match arguments(payload) {
        Ok(request) => state.tools.get_enterprise_details(&request).await,
        Err(e) => Err(e),
    };
    respond(result)
}

/// `get_api_status` handler; takes no arguments
pub async fn get_api_status(State(state): State<AppState>) -> Response {
    respond(Ok(state.tools.get_api_status().await))
}

/// Generic call by tool name
#[derive(Debug, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub async fn call_tool(
    State(state): State<AppState>,
    payload: Result<Json<ToolCall>, JsonRejection>,
) -> Response {
    let call = match arguments(payload) {
        Ok(call) => call,
        Err(e) => return respond::<()>(Err(e)),
    };

    let response = state.tools.call(&call.name, call.arguments).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response)).into_response()
}

/// Tool discovery
pub async fn list_tools() -> Json<Vec<ToolDescriptor>> {
    Json(Tools::descriptors())
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "instance": state.instance_name(),
        "version": crate::VERSION
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub rate_limits: BTreeMap<String, RateLimitStatus>,
    pub metrics: MetricsSnapshot,
}

/// Cache, limiter and call statistics
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let rate_limits = state
        .limiter
        .sources()
        .into_iter()
        .map(|source| {
            let status = state.limiter.status(&source);
            (source, status)
        })
        .collect();

    Json(StatsResponse {
        cache: state.cache.stats().await,
        rate_limits,
        metrics: state.metrics.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{Settings, SourceConfig};
    use crate::network::HttpClient;
    use crate::ratelimit::RateLimiter;
    use crate::sources::{Recherche, SourceContext, SourceRegistry};
    use crate::web::create_router;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(server: &MockServer) -> axum::Router {
        let limiter = Arc::new(RateLimiter::default());
        let cache = Arc::new(Cache::default());
        let ctx = SourceContext::new(
            "recherche",
            limiter.clone(),
            cache.clone(),
            HttpClient::new().unwrap(),
        );
        let mut registry = SourceRegistry::new();
        registry.register(
            Arc::new(Recherche::new(ctx).with_base_url(server.uri())),
            SourceConfig::new("recherche", "recherche"),
        );
        create_router(AppState::new(Settings::default(), registry, limiter, cache))
    }

    async fn send(app: axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_search_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"siren": "552032534", "nom_complet": "DANONE"}]
            })))
            .mount(&server)
            .await;

        let (status, body) = send(
            app(&server),
            "POST",
            "/tools/search_enterprises",
            json!({"query": "danone", "max_results": 5}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][0]["data"][0]["siren"], "552032534");
    }

    #[tokio::test]
    async fn test_invalid_requests_are_400() {
        let server = MockServer::start().await;

        let (status, body) = send(
            app(&server),
            "POST",
            "/tools/search_enterprises",
            json!({"query": "danone", "max_results": 500}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = send(
            app(&server),
            "POST",
            "/tools/get_enterprise_details",
            json!({"query": "missing id"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("InvalidRequest"));
    }

    #[tokio::test]
    async fn test_source_failure_is_still_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let (status, body) = send(
            app(&server),
            "POST",
            "/tools/get_enterprise_details",
            json!({"id": "552032534"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["recherche"]["status"], "source_error");
    }

    #[tokio::test]
    async fn test_status_and_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;
        let app = app(&server);

        let (status, body) = send(app.clone(), "GET", "/tools/get_api_status", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["recherche"]["available"], true);

        let (status, body) = send(app, "GET", "/stats", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["cache"]["hits"].is_number());
        assert!(body["rate_limits"]["recherche"]["remaining"].is_number());
    }
}
