//! INPI RNE (Registre national des entreprises) source implementation
//!
//! Session login with username/password. INPI counts logins against the same
//! quota as data calls, so each login is charged to the limiter.

use super::context::SourceContext;
use super::lease::{Lease, LeaseManager, LeaseState};
use super::traits::*;
use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};
use crate::network::HttpClient;
use crate::query::{siren_of, ParsedQuery};
use crate::ratelimit::RateLimiter;
use crate::results::{
    Activity, Address, BeneficialOwner, EnterpriseRecord, EnterpriseStatus, FinancialStatement,
    IntellectualPropertyAsset,
};
use anyhow::{anyhow, Result as AnyhowResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://registre-national-entreprises.inpi.fr";

/// Session lifetime when the provider does not state one
const SESSION_LIFETIME: Duration = Duration::from_secs(3600);

/// INPI RNE source
pub struct Inpi {
    ctx: SourceContext,
    base_url: String,
    auth: InpiAuth,
    lease: LeaseManager,
}

#[derive(Clone)]
struct InpiAuth {
    source: String,
    client: HttpClient,
    limiter: Arc<RateLimiter>,
    login_url: String,
    username: String,
    password: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl InpiAuth {
    async fn login(self) -> SourceResult<Lease> {
        self.limiter.charge(&self.source).await;

        let request = SourceRequest::post(&self.login_url)
            .json(json!({"username": self.username, "password": self.password}))
            .timeout(self.timeout);
        let response = self.client.execute(request).await?;

        if !response.found(&self.source)? {
            return Err(SourceError::AuthenticationFailed(
                "inpi login endpoint not found".to_string(),
            ));
        }
        let body: LoginResponse = response.json(&self.source)?;
        Ok(Lease::new(body.token, SESSION_LIFETIME))
    }
}

impl Inpi {
    pub fn new(ctx: SourceContext, username: impl Into<String>, password: impl Into<String>) -> Self {
        let auth = InpiAuth {
            source: ctx.name().to_string(),
            client: ctx.client().clone(),
            limiter: ctx.limiter().clone(),
            login_url: format!("{}/api/sso/login", DEFAULT_BASE_URL),
            username: username.into(),
            password: password.into(),
            timeout: ctx.timeout(),
        };
        let lease = LeaseManager::new(ctx.name(), ctx.cache().clone());

        Self {
            ctx,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth,
            lease,
        }
    }

    /// Build from configuration; credentials are mandatory
    pub fn from_config(config: &SourceConfig, ctx: SourceContext) -> AnyhowResult<Self> {
        let creds = &config.credentials;
        let (username, password) = match (&creds.username, &creds.password) {
            (Some(u), Some(p)) => (u.clone(), p.clone()),
            _ => return Err(anyhow!("inpi requires username and password")),
        };

        let mut source = Self::new(ctx, username, password);
        if let Some(ref url) = config.base_url {
            source = source.with_base_url(url);
        }
        if let Some(ref url) = config.auth_url {
            source = source.with_login_url(url);
        }
        Ok(source)
    }

    /// Point at another host; the login URL follows unless set explicitly afterwards
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self.auth.login_url = format!("{}/api/sso/login", self.base_url);
        self
    }

    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.auth.login_url = url.into();
        self
    }

    pub fn lease_state(&self) -> LeaseState {
        self.lease.state()
    }

    async fn authorized_get(&self, request: SourceRequest) -> SourceResult<SourceResponse> {
        let auth = self.auth.clone();
        let token = self.lease.token(move || auth.login()).await?;

        let response = self.ctx.send(request.bearer(token)).await?;
        if response.status == 401 {
            self.lease.invalidate().await;
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: SourceRequest,
    ) -> SourceResult<Option<T>> {
        let response = self.authorized_get(request).await?;
        if !response.found(self.name())? {
            return Ok(None);
        }
        response.json(self.name()).map(Some)
    }

    /// Company filing, cached per SIREN and shared by details and owners
    async fn company(&self, siren: &str) -> SourceResult<Option<Company>> {
        self.ctx
            .fetch_cached("company", &[siren], || {
                self.get_json(SourceRequest::get(format!(
                    "{}/api/companies/{}",
                    self.base_url, siren
                )))
            })
            .await
    }

    async fn financials(&self, siren: &str) -> SourceResult<Vec<FinancialStatement>> {
        self.ctx
            .fetch_cached("attachments", &[siren], || async {
                let request =
                    SourceRequest::get(format!("{}/api/companies/{}/attachments", self.base_url, siren));
                let attachments: Option<Attachments> = self.get_json(request).await?;
                Ok(attachments
                    .map(|a| a.bilans.into_iter().map(Bilan::into_statement).collect())
                    .unwrap_or_default())
            })
            .await
    }

    async fn trademarks(&self, siren: &str) -> SourceResult<Vec<IntellectualPropertyAsset>> {
        self.ctx
            .fetch_cached("trademarks", &[siren], || async {
                let request =
                    SourceRequest::get(format!("{}/api/companies/{}/trademarks", self.base_url, siren));
                let trademarks: Option<Vec<Trademark>> = self.get_json(request).await?;
                Ok(trademarks
                    .unwrap_or_default()
                    .into_iter()
                    .map(Trademark::into_asset)
                    .collect())
            })
            .await
    }
}

#[async_trait]
impl Source for Inpi {
    fn name(&self) -> &str {
        self.ctx.name()
    }

    fn about(&self) -> SourceAbout {
        SourceAbout::new()
            .website("https://data.inpi.fr")
            .credentials_required(true)
            .extension("beneficial_owners")
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> SourceResult<Vec<EnterpriseRecord>> {
        let parsed = ParsedQuery::parse(query);
        let page_size = options.max_results.to_string();

        let mut records: Vec<EnterpriseRecord> = self
            .ctx
            .fetch_cached("search", &[&parsed.query, &page_size], || async {
                let request = SourceRequest::get(format!("{}/api/companies", self.base_url))
                    .param("pageSize", page_size.as_str());
                let request = match parsed.kind.siren() {
                    Some(siren) => request.param("siren[]", siren),
                    None => request.param("companyName", parsed.query.as_str()),
                };

                let companies: Option<Vec<Company>> = self.get_json(request).await?;
                Ok(companies
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| c.into_record(self.name()))
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

        let Some(company) = self.company(&siren).await? else {
            return Ok(None);
        };
        let owners = company.beneficial_owners();
        let mut record = company.into_record(self.name());

        let (financials, trademarks) = futures::join!(
            async {
                if options.include_financials {
                    Some(self.financials(&siren).await)
                } else {
                    None
                }
            },
            async {
                if options.include_intellectual_property {
                    Some(self.trademarks(&siren).await)
                } else {
                    None
                }
            }
        );

        match financials {
            Some(Ok(statements)) => record.financials = Some(statements),
            Some(Err(e)) => warn!("inpi: financials for {} unavailable: {}", siren, e),
            None => {}
        }
        match trademarks {
            Some(Ok(assets)) => record.intellectual_property = Some(assets),
            Some(Err(e)) => warn!("inpi: trademarks for {} unavailable: {}", siren, e),
            None => {}
        }
        if options.include_beneficial_owners {
            record.beneficial_owners = Some(owners);
        }

        Ok(Some(record))
    }

    async fn get_status(&self) -> SourceStatus {
        // Unauthenticated: any answer below 500 proves the API is up
        let probe = self
            .ctx
            .probe(SourceRequest::get(format!("{}/api/companies", self.base_url)).param("pageSize", "1"))
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

    async fn get_beneficial_owners(&self, id: &str) -> SourceResult<Vec<BeneficialOwner>> {
        let siren = siren_of(id)
            .ok_or_else(|| SourceError::InvalidRequest(format!("not a SIREN/SIRET: {}", id)))?;
        Ok(self
            .company(&siren)
            .await?
            .map(|c| c.beneficial_owners())
            .unwrap_or_default())
    }
}

// RNE formality payload, reduced to the fields we map

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Company {
    siren: String,
    #[serde(default)]
    formality: Formality,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Formality {
    #[serde(default)]
    content: FormalityContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormalityContent {
    nature_cessation_entreprise: Option<serde_json::Value>,
    personne_morale: Option<PersonneMorale>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonneMorale {
    #[serde(default)]
    identite: Identite,
    adresse_entreprise: Option<AdresseEntreprise>,
    #[serde(default)]
    beneficiaires_effectifs: Vec<BeneficiaireEffectif>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identite {
    #[serde(default)]
    entreprise: Entreprise,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entreprise {
    denomination: Option<String>,
    forme_juridique: Option<String>,
    code_ape: Option<String>,
    date_immat: Option<String>,
    effectif_salarie: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdresseEntreprise {
    #[serde(default)]
    adresse: Adresse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Adresse {
    num_voie: Option<String>,
    type_voie: Option<String>,
    voie: Option<String>,
    code_postal: Option<String>,
    commune: Option<String>,
    pays: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeneficiaireEffectif {
    beneficiaire: Beneficiaire,
    #[serde(default)]
    modalite: Modalite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Beneficiaire {
    description_personne: DescriptionPersonne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionPersonne {
    nom: String,
    #[serde(default)]
    prenoms: Vec<String>,
    nationalite: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Modalite {
    detention_part_totale: Option<f64>,
}

impl Company {
    fn personne_morale(&self) -> Option<&PersonneMorale> {
        self.formality.content.personne_morale.as_ref()
    }

    fn beneficial_owners(&self) -> Vec<BeneficialOwner> {
        self.personne_morale()
            .map(|pm| {
                pm.beneficiaires_effectifs
                    .iter()
                    .map(|b| {
                        let person = &b.beneficiaire.description_personne;
                        let name = if person.prenoms.is_empty() {
                            person.nom.clone()
                        } else {
                            format!("{} {}", person.prenoms.join(" "), person.nom)
                        };
                        BeneficialOwner {
                            name,
                            nationality: person.nationalite.clone(),
                            ownership_percentage: b.modalite.detention_part_totale,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn into_record(self, source: &str) -> EnterpriseRecord {
        let ceased = self.formality.content.nature_cessation_entreprise.is_some();
        let pm = self.formality.content.personne_morale.unwrap_or_default();
        let entreprise = pm.identite.entreprise;

        let mut record = EnterpriseRecord::new(
            self.siren,
            entreprise.denomination.unwrap_or_default(),
            source,
        )
        .with_status(if ceased {
            EnterpriseStatus::Ceased
        } else {
            EnterpriseStatus::Active
        });

        record.legal_form = entreprise.forme_juridique;
        record.activity = entreprise.code_ape.map(|code| Activity { code, label: None });
        record.creation_date = entreprise.date_immat;
        record.employee_range = entreprise.effectif_salarie;
        record.address = pm
            .adresse_entreprise
            .map(|a| a.adresse.into_address())
            .filter(|a| !a.is_empty());
        record
    }
}

impl Adresse {
    fn into_address(self) -> Address {
        let street: Vec<String> = [self.num_voie, self.type_voie, self.voie]
            .into_iter()
            .flatten()
            .collect();
        Address {
            street: (!street.is_empty()).then(|| street.join(" ")),
            postal_code: self.code_postal,
            city: self.commune,
            country: self.pays,
        }
    }
}

#[derive(Deserialize)]
struct Attachments {
    #[serde(default)]
    bilans: Vec<Bilan>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bilan {
    date_cloture: String,
    chiffre_affaires: Option<f64>,
    resultat: Option<f64>,
    confidentiality: Option<String>,
}

impl Bilan {
    fn into_statement(self) -> FinancialStatement {
        let confidential = self
            .confidentiality
            .map(|c| !c.eq_ignore_ascii_case("public"))
            .unwrap_or(false);
        FinancialStatement {
            fiscal_year_end: self.date_cloture,
            revenue: if confidential { None } else { self.chiffre_affaires },
            net_income: if confidential { None } else { self.resultat },
            confidential,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Trademark {
    marque: String,
    numero: Option<String>,
    date_depot: Option<String>,
}

impl Trademark {
    fn into_asset(self) -> IntellectualPropertyAsset {
        IntellectualPropertyAsset {
            kind: "trademark".to_string(),
            title: self.marque,
            registration_number: self.numero,
            filing_date: self.date_depot,
        }
    }
}
