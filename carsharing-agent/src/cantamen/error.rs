//! Upstream client error types.

use std::sync::Arc;

/// Errors from the casirest HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Session credential rejected
    #[error("unauthorized (session expired or invalid credentials)")]
    Unauthorized,

    /// API returned an error status code
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// JSON deserialization failed
    #[error("JSON parse error: {message}")]
    Json {
        message: String,
        body: Option<String>,
    },

    /// Failure of a load shared between several concurrent callers
    #[error("{0}")]
    Shared(Arc<UpstreamError>),
}

impl UpstreamError {
    /// Whether the upstream rejected the session credential.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            UpstreamError::Unauthorized => true,
            UpstreamError::Shared(inner) => inner.is_unauthorized(),
            _ => false,
        }
    }

    /// The upstream status code, if the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Unauthorized => Some(401),
            UpstreamError::Api { status, .. } => Some(*status),
            UpstreamError::Shared(inner) => inner.status(),
            UpstreamError::Http(e) => e.status().map(|s| s.as_u16()),
            UpstreamError::Json { .. } => None,
        }
    }
}

impl From<Arc<UpstreamError>> for UpstreamError {
    fn from(err: Arc<UpstreamError>) -> Self {
        UpstreamError::Shared(err)
    }
}
