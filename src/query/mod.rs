//! Query parsing module
//!
//! Classifies user queries and identifiers:
//! - SIREN: 9 ASCII digits, spaces tolerated (`552 032 534`)
//! - SIRET: 14 ASCII digits, spaces tolerated (`552 032 534 00014`)
//! - anything else is a name search

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SIREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{9}$").expect("valid regex"));
static SIRET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{14}$").expect("valid regex"));

/// What a query designates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum QueryKind {
    Siren(String),
    Siret(String),
    Name(String),
}

impl QueryKind {
    /// The SIREN an identifier designates; a SIRET starts with it
    pub fn siren(&self) -> Option<&str> {
        match self {
            QueryKind::Siren(siren) => Some(siren),
            QueryKind::Siret(siret) => siret.get(..9),
            QueryKind::Name(_) => None,
        }
    }
}

/// Parsed search query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// The cleaned query (identifiers without spaces, names trimmed)
    pub query: String,
    /// Original raw query
    pub raw_query: String,
    /// Classification
    pub kind: QueryKind,
}

impl ParsedQuery {
    /// Parse a raw query string
    pub fn parse(raw: &str) -> Self {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

        let kind = if SIREN_RE.is_match(&compact) {
            QueryKind::Siren(compact)
        } else if SIRET_RE.is_match(&compact) {
            QueryKind::Siret(compact)
        } else {
            QueryKind::Name(raw.split_whitespace().collect::<Vec<_>>().join(" "))
        };

        let query = match &kind {
            QueryKind::Siren(v) | QueryKind::Siret(v) | QueryKind::Name(v) => v.clone(),
        };

        Self {
            query,
            raw_query: raw.to_string(),
            kind,
        }
    }

    /// Whether the query is an identifier rather than a name
    pub fn is_identifier(&self) -> bool {
        !matches!(self.kind, QueryKind::Name(_))
    }

    /// Check if query is empty
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }
}

/// Normalize an enterprise identifier to its SIREN.
///
/// Accepts a SIREN or a SIRET (whose first nine digits are the SIREN).
pub fn siren_of(id: &str) -> Option<String> {
    ParsedQuery::parse(id).kind.siren().map(str::to_string)
}

/// Whether `id` is a well-formed SIREN or SIRET
pub fn is_valid_identifier(id: &str) -> bool {
    siren_of(id).is_some()
}
