//! HTTP client for making requests to registry providers

use crate::config::OutgoingSettings;
use crate::error::{SourceError, SourceResult};
use crate::sources::{HttpMethod, RequestBody, SourceRequest, SourceResponse};
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// HTTP client wrapper shared by every source adapter
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    default_timeout: Duration,
    max_timeout: Duration,
    user_agent: String,
    extra_headers: HashMap<String, String>,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> anyhow::Result<Self> {
        Self::with_settings(&OutgoingSettings::default())
    }

    /// Create a new HTTP client with custom settings
    pub fn with_settings(settings: &OutgoingSettings) -> anyhow::Result<Self> {
        let default_timeout = Duration::try_from_secs_f64(settings.request_timeout)?;
        let max_timeout = Duration::try_from_secs_f64(settings.max_request_timeout)?;

        let mut builder = Client::builder()
            .timeout(max_timeout)
            .pool_max_idle_per_host(settings.pool_maxsize)
            .gzip(true)
            .brotli(true);

        if !settings.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref proxy_url) = settings.proxies.all {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        } else {
            if let Some(ref http) = settings.proxies.http {
                builder = builder.proxy(reqwest::Proxy::http(http)?);
            }
            if let Some(ref https) = settings.proxies.https {
                builder = builder.proxy(reqwest::Proxy::https(https)?);
            }
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            default_timeout,
            max_timeout,
            user_agent: format!("registry-hub/{}", crate::VERSION),
            extra_headers: settings.extra_headers.clone(),
        })
    }

    /// Default per-request timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Clamp a requested timeout to the configured maximum
    pub fn clamp_timeout(&self, timeout: Duration) -> Duration {
        timeout.min(self.max_timeout)
    }

    /// Execute a source request
    pub async fn execute(&self, request: SourceRequest) -> SourceResult<SourceResponse> {
        let timeout = self.clamp_timeout(request.timeout.unwrap_or(self.default_timeout));

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        req_builder = req_builder
            .timeout(timeout)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json");

        for (key, value) in &self.extra_headers {
            req_builder = req_builder.header(key, value);
        }

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(ref token) = request.bearer {
            req_builder = req_builder.bearer_auth(token);
        }

        if let Some((ref user, ref password)) = request.basic_auth {
            req_builder = req_builder.basic_auth(user, Some(password));
        }

        if !request.params.is_empty() {
            req_builder = req_builder.query(&request.params);
        }

        if let Some(body) = request.data {
            req_builder = match body {
                RequestBody::Form(data) => req_builder.form(&data),
                RequestBody::Json(json) => req_builder.json(&json),
            };
        }

        debug!("{:?} {}", request.method, request.url);
        let response = req_builder.send().await.map_err(SourceError::from)?;

        Self::parse_response(response).await
    }

    /// Parse response into SourceResponse
    async fn parse_response(response: Response) -> SourceResult<SourceResponse> {
        let status = response.status().as_u16();
        let url = response.url().to_string();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let text = response.text().await.map_err(SourceError::from)?;

        Ok(SourceResponse {
            status,
            headers,
            text,
            url,
        })
    }

    /// Current user agent
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new();
        assert!(client.is_ok());
        assert!(client.unwrap().user_agent().starts_with("registry-hub/"));
    }

    #[tokio::test]
    async fn test_execute_sends_auth_and_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/siren"))
            .and(query_param("q", "danone"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let request = SourceRequest::get(format!("{}/siren", server.uri()))
            .param("q", "danone")
            .bearer("tok");
        let response = client.execute(request).await.unwrap();

        assert!(response.is_success());
        let body: serde_json::Value = response.json("test").unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let request = SourceRequest::get(server.uri()).timeout(Duration::from_millis(50));
        let result = client.execute(request).await;

        assert!(matches!(result, Err(SourceError::NetworkOrTimeout(_))));
    }
}
