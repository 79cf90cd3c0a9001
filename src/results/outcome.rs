//! Per-source outcome types collected by the orchestrator

use crate::error::SourceError;
use serde::{Deserialize, Serialize};

/// One source's share of a multi-source call: data or an error, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartialOutcome<T> {
    Data { source: String, data: T },
    Error { source: String, error: String },
}

impl<T> PartialOutcome<T> {
    pub fn data(source: impl Into<String>, data: T) -> Self {
        Self::Data {
            source: source.into(),
            data,
        }
    }

    pub fn error(source: impl Into<String>, error: impl ToString) -> Self {
        Self::Error {
            source: source.into(),
            error: error.to_string(),
        }
    }

    pub fn from_result(source: impl Into<String>, result: Result<T, SourceError>) -> Self {
        match result {
            Ok(data) => Self::data(source, data),
            Err(e) => Self::error(source, e),
        }
    }

    /// Name of the source this outcome belongs to
    pub fn source(&self) -> &str {
        match self {
            Self::Data { source, .. } | Self::Error { source, .. } => source,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn as_data(&self) -> Option<&T> {
        match self {
            Self::Data { data, .. } => Some(data),
            Self::Error { .. } => None,
        }
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Data { .. } => None,
        }
    }
}

/// Result of a single-record lookup on one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome<T> {
    Found { data: T },
    NotFound,
    SourceError { error: String },
}

impl<T> SourceOutcome<T> {
    /// Fold an adapter lookup into an outcome
    pub fn from_lookup(result: Result<Option<T>, SourceError>) -> Self {
        match result {
            Ok(Some(data)) => Self::Found { data },
            Ok(None) => Self::NotFound,
            Err(e) => Self::SourceError {
                error: e.to_string(),
            },
        }
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Self::Found { data } => Some(data),
            Self::NotFound | Self::SourceError { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::SourceError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_outcome_shape() {
        let ok: PartialOutcome<Vec<u32>> = PartialOutcome::data("A", vec![1]);
        let err: PartialOutcome<Vec<u32>> = PartialOutcome::error(
            "B",
            SourceError::NetworkOrTimeout("connection reset".to_string()),
        );

        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"source": "A", "data": [1]})
        );
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"source": "B", "error": "NetworkOrTimeout: connection reset"})
        );
        assert_eq!(err.source(), "B");
        assert!(err.is_error());
        assert!(ok.as_error().is_none());
    }

    #[test]
    fn test_source_outcome_from_lookup() {
        let found = SourceOutcome::from_lookup(Ok(Some(1)));
        let missing: SourceOutcome<u32> = SourceOutcome::from_lookup(Ok(None));
        let failed: SourceOutcome<u32> = SourceOutcome::from_lookup(Err(
            SourceError::AuthenticationFailed("bad key".to_string()),
        ));

        assert_eq!(found.found(), Some(&1));
        assert_eq!(missing, SourceOutcome::NotFound);
        assert!(failed.is_error());
        assert_eq!(
            serde_json::to_value(&missing).unwrap(),
            json!({"status": "not_found"})
        );
    }
}
