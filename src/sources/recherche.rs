//! Recherche d'entreprises source implementation
//!
//! Public API of annuaire-entreprises, no authentication. Pages hold at most
//! 25 results; larger searches fetch further pages, each charged to the
//! source's rate budget.

use super::context::SourceContext;
use super::traits::*;
use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};
use crate::query::{siren_of, ParsedQuery};
use crate::results::{Activity, Address, EnterpriseRecord, EnterpriseStatus, FinancialStatement};
use anyhow::Result as AnyhowResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_BASE_URL: &str = "https://recherche-entreprises.api.gouv.fr";

/// Largest page the API serves
const MAX_PER_PAGE: usize = 25;

/// Recherche d'entreprises source
pub struct Recherche {
    ctx: SourceContext,
    base_url: String,
}

impl Recherche {
    pub fn new(ctx: SourceContext) -> Self {
        Self {
            ctx,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn from_config(config: &SourceConfig, ctx: SourceContext) -> AnyhowResult<Self> {
        let mut source = Self::new(ctx);
        if let Some(ref url) = config.base_url {
            source = source.with_base_url(url);
        }
        Ok(source)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_page(
        &self,
        query: &str,
        per_page: usize,
        page: usize,
    ) -> SourceResult<SearchResponse> {
        let request = SourceRequest::get(format!("{}/search", self.base_url))
            .param("q", query)
            .param("per_page", per_page.to_string())
            .param("page", page.to_string());

        let response = self.ctx.send(request).await?;
        if !response.found(self.name())? {
            return Ok(SearchResponse::default());
        }
        response.json(self.name())
    }

    /// Up to `wanted` hits, walking pages until enough are collected
    async fn fetch(&self, query: &str, wanted: usize) -> SourceResult<Vec<SearchHit>> {
        let wanted = wanted.max(1);
        let per_page = wanted.min(MAX_PER_PAGE);
        let mut hits = Vec::new();
        let mut page = 1;

        loop {
            // the first page runs under the caller's admission
            if page > 1 {
                self.ctx.limiter().charge(self.name()).await;
            }
            let body = self.fetch_page(query, per_page, page).await?;
            let received = body.results.len();
            hits.extend(body.results);

            let last_page = body.total_pages.map_or(false, |total| page >= total);
            if hits.len() >= wanted || received < per_page || last_page {
                break;
            }
            page += 1;
        }

        hits.truncate(wanted);
        Ok(hits)
    }
}

#[async_trait]
impl Source for Recherche {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn about(&self) -> SourceAbout {
        SourceAbout::new().website("https://annuaire-entreprises.data.gouv.fr")
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> SourceResult<Vec<EnterpriseRecord>> {
        let parsed = ParsedQuery::parse(query);
        let per_page = options.max_results.to_string();

        let mut records: Vec<EnterpriseRecord> = self
            .ctx
            .fetch_cached("search", &[&parsed.query, &per_page], || async {
                let hits = self.fetch(&parsed.query, options.max_results).await?;
                Ok(hits
                    .into_iter()
                    .map(|h| h.into_record(self.name(), false))
                    .collect())
            })
            .await?;

        records.truncate(options.max_results);
        Ok(records)
    }

    async fn get_details(
        &self,
        id: &str,
        options: &DetailsOptions,
    ) -> SourceResult<Option<EnterpriseRecord>> {
        let siren = siren_of(id)
            .ok_or_else(|| SourceError::InvalidRequest(format!("not a SIREN/SIRET: {}", id)))?;
        let tag = options.cache_tag();

        // Financials come in the same payload; no sub-call to compose
        self.ctx
            .fetch_cached("details", &[&siren, &tag], || async {
                let hits = self.fetch(&siren, 1).await?;
                Ok(hits
                    .into_iter()
                    .find(|h| h.siren == siren)
                    .map(|h| h.into_record(self.name(), options.include_financials)))
            })
            .await
    }

    async fn get_status(&self) -> SourceStatus {
        let probe = self
            .ctx
            .probe(
                SourceRequest::get(format!("{}/search", self.base_url))
                    .param("q", "ping")
                    .param("per_page", "1"),
            )
            .await;

        SourceStatus {
            source: self.name().to_string(),
            available: probe.available,
            latency_ms: probe.latency_ms,
            rate_limit: self.ctx.rate_limit_status(),
            authenticated: None,
            message: probe.message,
        }
    }
}

#[derive(Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
    total_pages: Option<usize>,
}

#[derive(Deserialize)]
struct SearchHit {
    siren: String,
    nom_complet: Option<String>,
    nom_raison_sociale: Option<String>,
    nature_juridique: Option<String>,
    activite_principale: Option<String>,
    etat_administratif: Option<String>,
    date_creation: Option<String>,
    tranche_effectif_salarie: Option<String>,
    siege: Option<Siege>,
    /// Keyed by fiscal year
    #[serde(default)]
    finances: Option<BTreeMap<String, Finances>>,
}

#[derive(Deserialize)]
struct Siege {
    siret: Option<String>,
    numero_voie: Option<String>,
    type_voie: Option<String>,
    libelle_voie: Option<String>,
    code_postal: Option<String>,
    libelle_commune: Option<String>,
}

#[derive(Deserialize)]
struct Finances {
    ca: Option<f64>,
    resultat_net: Option<f64>,
}

impl SearchHit {
    fn into_record(self, source: &str, with_financials: bool) -> EnterpriseRecord {
        let name = self
            .nom_complet
            .or(self.nom_raison_sociale)
            .unwrap_or_default();

        let mut record = EnterpriseRecord::new(self.siren, name, source).with_status(
            self.etat_administratif
                .as_deref()
                .map(EnterpriseStatus::from_code)
                .unwrap_or_default(),
        );
        record.legal_form = self.nature_juridique;
        record.activity = self
            .activite_principale
            .map(|code| Activity { code, label: None });
        record.creation_date = self.date_creation;
        record.employee_range = self.tranche_effectif_salarie;

        if let Some(siege) = self.siege {
            record.siret = siege.siret;
            let street: Vec<String> = [siege.numero_voie, siege.type_voie, siege.libelle_voie]
                .into_iter()
                .flatten()
                .collect();
            let address = Address {
                street: (!street.is_empty()).then(|| street.join(" ")),
                postal_code: siege.code_postal,
                city: siege.libelle_commune,
                country: Some("FR".to_string()),
            };
            record.address = Some(address);
        }

        if with_financials {
            // Most recent year first
            record.financials = Some(
                self.finances
                    .unwrap_or_default()
                    .into_iter()
                    .rev()
                    .map(|(year, f)| FinancialStatement {
                        fiscal_year_end: format!("{}-12-31", year),
                        revenue: f.ca,
                        net_income: f.resultat_net,
                        confidential: false,
                    })
                    .collect(),
            );
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::network::HttpClient;
    use crate::ratelimit::{RateLimitBudget, RateLimiter};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hit() -> serde_json::Value {
        json!({
            "siren": "552032534",
            "nom_complet": "DANONE",
            "nature_juridique": "5599",
            "activite_principale": "70.10Z",
            "etat_administratif": "A",
            "date_creation": "1955-01-01",
            "siege": {
                "siret": "55203253400646",
                "numero_voie": "17",
                "type_voie": "BD",
                "libelle_voie": "HAUSSMANN",
                "code_postal": "75009",
                "libelle_commune": "PARIS"
            },
            "finances": {
                "2022": {"ca": 27_661_000_000.0, "resultat_net": 959_000_000.0},
                "2023": {"ca": 27_619_000_000.0, "resultat_net": 881_000_000.0}
            }
        })
    }

    fn recherche(server: &MockServer) -> Recherche {
        let ctx = SourceContext::new(
            "recherche",
            Arc::new(RateLimiter::new(RateLimitBudget::new(50, 10_000, 1_000_000))),
            Arc::new(Cache::default()),
            HttpClient::new().unwrap(),
        );
        Recherche::new(ctx).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_search_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "danone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [hit()]})))
            .expect(1)
            .mount(&server)
            .await;

        let source = recherche(&server);
        let options = SearchOptions::default();
        let first = source.search("danone", &options).await.unwrap();
        let second = source.search("  DANONE ", &options).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].siret.as_deref(), Some("55203253400646"));
        // financials only on details
        assert!(first[0].financials.is_none());
    }

    fn hits(range: std::ops::Range<usize>) -> serde_json::Value {
        range
            .map(|i| json!({"siren": format!("{:09}", i), "nom_complet": format!("ACME {}", i)}))
            .collect()
    }

    #[tokio::test]
    async fn test_search_walks_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": hits(0..25),
                "total_pages": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": hits(25..35),
                "total_pages": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let limiter = Arc::new(RateLimiter::new(RateLimitBudget::new(50, 10_000, 1_000_000)));
        let ctx = SourceContext::new(
            "recherche",
            limiter.clone(),
            Arc::new(Cache::default()),
            HttpClient::new().unwrap(),
        );
        let source = Recherche::new(ctx).with_base_url(server.uri());

        let records = source
            .search("acme", &SearchOptions::default().with_max_results(30))
            .await
            .unwrap();

        assert_eq!(records.len(), 30);
        assert_eq!(records[29].siren, "000000029");
        // both pages count against the budget
        assert_eq!(limiter.status("recherche").remaining, 1_000_000 - 2);
    }

    #[tokio::test]
    async fn test_details_with_financials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "552032534"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [hit()]})))
            .mount(&server)
            .await;

        let source = recherche(&server);
        let options = DetailsOptions::new()
            .with_financials()
            .with_intellectual_property();
        let record = source.get_details("552032534", &options).await.unwrap().unwrap();

        let financials = record.financials.unwrap();
        assert_eq!(financials[0].fiscal_year_end, "2023-12-31");
        assert_eq!(financials[0].revenue, Some(27_619_000_000.0));
        assert!(record.intellectual_property.is_none());
    }

    #[tokio::test]
    async fn test_details_without_exact_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let source = recherche(&server);
        let record = source
            .get_details("123456789", &DetailsOptions::new())
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_throttled_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let source = recherche(&server);
        let result = source.search("danone", &SearchOptions::default()).await;
        assert!(matches!(result, Err(SourceError::RateLimitExceeded(_))));
    }

    #[tokio::test]
    async fn test_status_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let source = recherche(&server);
        let status = source.get_status().await;
        assert!(status.available);
        assert!(status.authenticated.is_none());
    }
}
