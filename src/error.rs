//! Error taxonomy shared by every source adapter

use thiserror::Error;

/// Errors a source adapter can surface for a single call.
///
/// "Resource not found" is deliberately absent: adapters report it as an
/// empty result (or `None`), never as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Credentials rejected or lease acquisition failed
    #[error("AuthenticationFailed: {0}")]
    AuthenticationFailed(String),

    /// The provider itself rejected the call because of its quota
    #[error("RateLimitExceeded: {0}")]
    RateLimitExceeded(String),

    /// Connectivity failure or deadline exceeded
    #[error("NetworkOrTimeout: {0}")]
    NetworkOrTimeout(String),

    /// Malformed or unexpected response shape
    #[error("UpstreamDataError: {0}")]
    UpstreamDataError(String),

    /// Rejected before reaching the provider
    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    /// The source does not offer this operation
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl SourceError {
    /// Short kind name, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::RateLimitExceeded(_) => "rate_limit_exceeded",
            Self::NetworkOrTimeout(_) => "network_or_timeout",
            Self::UpstreamDataError(_) => "upstream_data_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unsupported(_) => "unsupported",
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// Returns `None` for 404, which callers normalize to "no result".
    pub fn from_status(status: u16, context: &str) -> Option<Self> {
        match status {
            404 => None,
            401 | 403 => Some(Self::AuthenticationFailed(format!(
                "{} rejected credentials (HTTP {})",
                context, status
            ))),
            429 => Some(Self::RateLimitExceeded(format!(
                "{} quota exhausted (HTTP 429)",
                context
            ))),
            _ => Some(Self::UpstreamDataError(format!(
                "{} answered HTTP {}",
                context, status
            ))),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::NetworkOrTimeout("request timed out".to_string())
        } else if err.is_decode() {
            Self::UpstreamDataError("response body could not be decoded".to_string())
        } else {
            // reqwest includes the URL; keep only the category in the message
            let category = if err.is_connect() {
                "connection failed"
            } else if err.is_request() {
                "request could not be sent"
            } else {
                "transport error"
            };
            Self::NetworkOrTimeout(category.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SourceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::NetworkOrTimeout("deadline exceeded".to_string())
    }
}

/// Result alias for adapter calls
pub type SourceResult<T> = std::result::Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes_kind() {
        let err = SourceError::NetworkOrTimeout("connection reset".to_string());
        assert_eq!(err.to_string(), "NetworkOrTimeout: connection reset");
    }

    #[test]
    fn test_status_classification() {
        assert!(SourceError::from_status(404, "insee").is_none());
        assert!(matches!(
            SourceError::from_status(401, "insee"),
            Some(SourceError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            SourceError::from_status(429, "insee"),
            Some(SourceError::RateLimitExceeded(_))
        ));
        assert!(matches!(
            SourceError::from_status(500, "insee"),
            Some(SourceError::UpstreamDataError(_))
        ));
    }
}
