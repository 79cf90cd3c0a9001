//! Canonical, provider-agnostic record types

use serde::{Deserialize, Serialize};

/// A single enterprise as returned by any source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnterpriseRecord {
    /// SIREN (9 digits)
    pub siren: String,
    /// SIRET of the head office (14 digits), when known
    pub siret: Option<String>,
    /// Registered name
    pub name: String,
    /// Legal form (code or label, as the source provides it)
    pub legal_form: Option<String>,
    /// Head-office address
    pub address: Option<Address>,
    /// Main activity
    pub activity: Option<Activity>,
    /// Administrative status
    #[serde(default)]
    pub status: EnterpriseStatus,
    /// Creation date (ISO 8601)
    pub creation_date: Option<String>,
    /// Headcount bracket
    pub employee_range: Option<String>,
    /// Source that produced this record
    pub source: String,
    /// Filed financial statements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financials: Option<Vec<FinancialStatement>>,
    /// Trademarks, patents and designs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intellectual_property: Option<Vec<IntellectualPropertyAsset>>,
    /// Declared beneficial owners
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficial_owners: Option<Vec<BeneficialOwner>>,
}

impl EnterpriseRecord {
    /// Create a record with the mandatory fields
    pub fn new(siren: impl Into<String>, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            siren: siren.into(),
            name: name.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_siret(mut self, siret: impl Into<String>) -> Self {
        self.siret = Some(siret.into());
        self
    }

    pub fn with_legal_form(mut self, legal_form: impl Into<String>) -> Self {
        self.legal_form = Some(legal_form.into());
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn with_status(mut self, status: EnterpriseStatus) -> Self {
        self.status = status;
        self
    }
}

/// Postal address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// True when no component is known
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.postal_code.is_none()
            && self.city.is_none()
            && self.country.is_none()
    }
}

/// Activity classification (NAF/APE)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub code: String,
    pub label: Option<String>,
}

/// Administrative status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnterpriseStatus {
    Active,
    Ceased,
    #[default]
    Unknown,
}

impl EnterpriseStatus {
    /// Map the single-letter administrative state used by French registries
    pub fn from_code(code: &str) -> Self {
        match code {
            "A" => Self::Active,
            "C" | "F" => Self::Ceased,
            _ => Self::Unknown,
        }
    }
}

/// One filed set of annual accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    /// Closing date of the fiscal year
    pub fiscal_year_end: String,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
    pub confidential: bool,
}

/// A registered intellectual property asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntellectualPropertyAsset {
    /// trademark, patent or design
    pub kind: String,
    pub title: String,
    pub registration_number: Option<String>,
    pub filing_date: Option<String>,
}

/// A natural person declared as beneficial owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficialOwner {
    pub name: String,
    pub nationality: Option<String>,
    pub ownership_percentage: Option<f64>,
}
