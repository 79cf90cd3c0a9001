//! INSEE Sirene source implementation
//!
//! OAuth2 client-credentials: a bearer token is leased from the token
//! endpoint and shared by every call. Logins are not charged to the data
//! quota.

use super::context::SourceContext;
use super::lease::{Lease, LeaseManager, LeaseState};
use super::traits::*;
use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};
use crate::network::HttpClient;
use crate::query::{siren_of, ParsedQuery, QueryKind};
use crate::results::{Activity, Address, EnterpriseRecord, EnterpriseStatus};
use anyhow::{anyhow, Result as AnyhowResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://api.insee.fr/entreprises/sirene/V3.11";
pub const DEFAULT_TOKEN_URL: &str = "https://api.insee.fr/token";

/// INSEE Sirene source
pub struct Insee {
    ctx: SourceContext,
    base_url: String,
    auth: Arc<InseeAuth>,
    lease: LeaseManager,
}

/// Token endpoint client, cloned into each login future
#[derive(Clone)]
struct InseeAuth {
    client: HttpClient,
    token_url: String,
    consumer_key: String,
    consumer_secret: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl InseeAuth {
    async fn login(self) -> SourceResult<Lease> {
        let mut form = HashMap::new();
        form.insert("grant_type".to_string(), "client_credentials".to_string());

        let request = SourceRequest::post(&self.token_url)
            .basic_auth(&self.consumer_key, &self.consumer_secret)
            .form(form)
            .timeout(self.timeout);
        let response = self.client.execute(request).await?;

        if !response.found("insee")? {
            return Err(SourceError::AuthenticationFailed(
                "insee token endpoint not found".to_string(),
            ));
        }
        let token: TokenResponse = response.json("insee")?;
        Ok(Lease::new(token.access_token, Duration::from_secs(token.expires_in)))
    }
}

impl Insee {
    pub fn new(
        ctx: SourceContext,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> Self {
        let auth = InseeAuth {
            client: ctx.client().clone(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            timeout: ctx.timeout(),
        };
        let lease = LeaseManager::new(ctx.name(), ctx.cache().clone());

        Self {
            ctx,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: Arc::new(auth),
            lease,
        }
    }

    /// Build from configuration; credentials are mandatory
    pub fn from_config(config: &SourceConfig, ctx: SourceContext) -> AnyhowResult<Self> {
        let creds = &config.credentials;
        let (key, secret) = match (&creds.client_id, &creds.client_secret) {
            (Some(key), Some(secret)) => (key.clone(), secret.clone()),
            _ => return Err(anyhow!("insee requires client_id and client_secret")),
        };

        let mut source = Self::new(ctx, key, secret);
        if let Some(ref url) = config.base_url {
            source = source.with_base_url(url);
        }
        if let Some(ref url) = config.auth_url {
            source = source.with_token_url(url);
        }
        Ok(source)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.auth).token_url = url.into();
        self
    }

    /// Current lease state
    pub fn lease_state(&self) -> LeaseState {
        self.lease.state()
    }

    /// GET with a leased bearer token; a 401 drops the lease
    async fn authorized_get(&self, request: SourceRequest) -> SourceResult<SourceResponse> {
        let auth = (*self.auth).clone();
        let token = self.lease.token(move || auth.login()).await?;

        let response = self.ctx.send(request.bearer(token)).await?;
        if response.status == 401 {
            self.lease.invalidate().await;
        }
        Ok(response)
    }

    async fn fetch_unite_legale(&self, siren: &str) -> SourceResult<Option<UniteLegale>> {
        let request = SourceRequest::get(format!("{}/siren/{}", self.base_url, siren));
        let response = self.authorized_get(request).await?;
        if !response.found(self.name())? {
            return Ok(None);
        }
        let body: SirenResponse = response.json(self.name())?;
        Ok(Some(body.unite_legale))
    }

    async fn fetch_etablissement(&self, siret: &str) -> SourceResult<Option<Etablissement>> {
        let request = SourceRequest::get(format!("{}/siret/{}", self.base_url, siret));
        let response = self.authorized_get(request).await?;
        if !response.found(self.name())? {
            return Ok(None);
        }
        let body: SiretResponse = response.json(self.name())?;
        Ok(Some(body.etablissement))
    }

    async fn search_by_name(&self, name: &str, max: usize) -> SourceResult<Vec<EnterpriseRecord>> {
        let request = SourceRequest::get(format!("{}/siren", self.base_url))
            .param("q", format!("periode(denominationUniteLegale:\"{}\")", name))
            .param("nombre", max.to_string());
        let response = self.authorized_get(request).await?;
        if !response.found(self.name())? {
            return Ok(Vec::new());
        }
        let body: SirenListResponse = response.json(self.name())?;
        Ok(body
            .unites_legales
            .into_iter()
            .map(|u| u.into_record(self.name()))
            .collect())
    }

    /// Head-office address, fetched through its own cache entry
    async fn head_office_address(&self, siret: &str) -> SourceResult<Option<Address>> {
        self.ctx
            .fetch_cached("siret", &[siret], || async {
                Ok(self
                    .fetch_etablissement(siret)
                    .await?
                    .and_then(|e| e.adresse_etablissement)
                    .map(AdresseEtablissement::into_address))
            })
            .await
    }
}

#[async_trait]
impl Source for Insee {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn about(&self) -> SourceAbout {
        SourceAbout::new()
            .website("https://api.insee.fr")
            .credentials_required(true)
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> SourceResult<Vec<EnterpriseRecord>> {
        let parsed = ParsedQuery::parse(query);
        let max = options.max_results.to_string();

        let mut records: Vec<EnterpriseRecord> = self
            .ctx
            .fetch_cached("search", &[&parsed.query, &max], || async {
                match &parsed.kind {
                    QueryKind::Siren(siren) => Ok(self
                        .fetch_unite_legale(siren)
                        .await?
                        .map(|u| u.into_record(self.name()))
                        .into_iter()
                        .collect()),
                    QueryKind::Siret(siret) => Ok(self
                        .fetch_etablissement(siret)
                        .await?
                        .map(|e| e.into_record(self.name()))
                        .into_iter()
                        .collect()),
                    QueryKind::Name(name) => self.search_by_name(name, options.max_results).await,
                }
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

        let unite: Option<UniteLegale> = self
            .ctx
            .fetch_cached("siren", &[&siren], || self.fetch_unite_legale(&siren))
            .await?;
        let Some(unite) = unite else {
            return Ok(None);
        };

        let head_office = unite.head_office_siret();
        let mut record = unite.into_record(self.name());

        if let Some(siret) = head_office {
            match self.head_office_address(&siret).await {
                Ok(address) => {
                    record.siret = Some(siret);
                    record.address = address;
                }
                Err(e) => warn!("insee: head office {} unavailable: {}", siret, e),
            }
        }

        if options.include_financials || options.include_intellectual_property {
            tracing::debug!("insee: financial and IP sections are not provided");
        }

        Ok(Some(record))
    }

    async fn get_status(&self) -> SourceStatus {
        let probe = self
            .ctx
            .probe(SourceRequest::get(format!("{}/informations", self.base_url)))
            .await;

        SourceStatus {
            source: self.name().to_string(),
            available: probe.available,
            latency_ms: probe.latency_ms,
            rate_limit: self.ctx.rate_limit_status(),
            authenticated: Some(self.lease.state() == LeaseState::Valid),
            message: probe.message,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SirenResponse {
    unite_legale: UniteLegale,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SirenListResponse {
    #[serde(default)]
    unites_legales: Vec<UniteLegale>,
}

#[derive(Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UniteLegale {
    siren: String,
    date_creation_unite_legale: Option<String>,
    tranche_effectifs_unite_legale: Option<String>,
    #[serde(default)]
    periodes_unite_legale: Vec<PeriodeUniteLegale>,
}

/// One historical period; the first is the current one
#[derive(Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PeriodeUniteLegale {
    etat_administratif_unite_legale: Option<String>,
    nom_unite_legale: Option<String>,
    denomination_unite_legale: Option<String>,
    categorie_juridique_unite_legale: Option<String>,
    activite_principale_unite_legale: Option<String>,
    nic_siege_unite_legale: Option<String>,
}

impl UniteLegale {
    fn current(&self) -> Option<&PeriodeUniteLegale> {
        self.periodes_unite_legale.first()
    }

    fn head_office_siret(&self) -> Option<String> {
        self.current()
            .and_then(|p| p.nic_siege_unite_legale.as_ref())
            .map(|nic| format!("{}{}", self.siren, nic))
    }

    fn into_record(self, source: &str) -> EnterpriseRecord {
        let period = self.current();
        let name = period
            .and_then(|p| {
                p.denomination_unite_legale
                    .clone()
                    .or_else(|| p.nom_unite_legale.clone())
            })
            .unwrap_or_default();

        let mut record = EnterpriseRecord::new(&self.siren, name, source);
        if let Some(p) = period {
            record.legal_form = p.categorie_juridique_unite_legale.clone();
            record.activity = p.activite_principale_unite_legale.clone().map(|code| Activity {
                code,
                label: None,
            });
            record.status = p
                .etat_administratif_unite_legale
                .as_deref()
                .map(EnterpriseStatus::from_code)
                .unwrap_or_default();
        }
        record.siret = self.head_office_siret();
        record.creation_date = self.date_creation_unite_legale;
        record.employee_range = self.tranche_effectifs_unite_legale;
        record
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiretResponse {
    etablissement: Etablissement,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Etablissement {
    siren: String,
    siret: String,
    unite_legale: Option<UniteLegaleEtablissement>,
    adresse_etablissement: Option<AdresseEtablissement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniteLegaleEtablissement {
    denomination_unite_legale: Option<String>,
    nom_unite_legale: Option<String>,
    categorie_juridique_unite_legale: Option<String>,
    activite_principale_unite_legale: Option<String>,
    etat_administratif_unite_legale: Option<String>,
    tranche_effectifs_unite_legale: Option<String>,
    date_creation_unite_legale: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdresseEtablissement {
    numero_voie_etablissement: Option<String>,
    type_voie_etablissement: Option<String>,
    libelle_voie_etablissement: Option<String>,
    code_postal_etablissement: Option<String>,
    libelle_commune_etablissement: Option<String>,
}

impl AdresseEtablissement {
    fn into_address(self) -> Address {
        let street: Vec<String> = [
            self.numero_voie_etablissement,
            self.type_voie_etablissement,
            self.libelle_voie_etablissement,
        ]
        .into_iter()
        .flatten()
        .collect();

        Address {
            street: if street.is_empty() {
                None
            } else {
                Some(street.join(" "))
            },
            postal_code: self.code_postal_etablissement,
            city: self.libelle_commune_etablissement,
            country: Some("FR".to_string()),
        }
    }
}

impl Etablissement {
    fn into_record(self, source: &str) -> EnterpriseRecord {
        let unite = self.unite_legale;
        let name = unite
            .as_ref()
            .and_then(|u| {
                u.denomination_unite_legale
                    .clone()
                    .or_else(|| u.nom_unite_legale.clone())
            })
            .unwrap_or_default();

        let mut record = EnterpriseRecord::new(self.siren, name, source).with_siret(self.siret);
        if let Some(u) = unite {
            record.legal_form = u.categorie_juridique_unite_legale;
            record.activity = u
                .activite_principale_unite_legale
                .map(|code| Activity { code, label: None });
            record.status = u
                .etat_administratif_unite_legale
                .as_deref()
                .map(EnterpriseStatus::from_code)
                .unwrap_or_default();
            record.employee_range = u.tranche_effectifs_unite_legale;
            record.creation_date = u.date_creation_unite_legale;
        }
        record.address = self
            .adresse_etablissement
            .map(AdresseEtablissement::into_address)
            .filter(|a| !a.is_empty());
        record
    }
}
