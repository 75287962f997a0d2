//! Error types for search index service calls.

use reindex_types::ReindexError;
use thiserror::Error;

/// Errors returned by a [`SearchIndex`](crate::SearchIndex) implementation.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Failed to parse service response: {0}")]
    Parse(String),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl SearchError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Http(_) | SearchError::RateLimited => true,
            SearchError::Api { status, .. } => *status >= 500,
            SearchError::Parse(_) | SearchError::Config(_) => false,
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Parse(err.to_string())
    }
}

impl From<SearchError> for ReindexError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Config(msg) => ReindexError::Configuration(msg),
            other => ReindexError::TransientIndex(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(SearchError::Http("reset".into()).is_retryable());
        assert!(SearchError::RateLimited.is_retryable());
        assert!(SearchError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SearchError::Api {
            status: 404,
            message: "no index".into()
        }
        .is_retryable());
        assert!(!SearchError::Parse("bad json".into()).is_retryable());
    }

    #[test]
    fn test_into_reindex_error() {
        let err: ReindexError = SearchError::Config("missing app id".into()).into();
        assert!(matches!(err, ReindexError::Configuration(_)));

        let err: ReindexError = SearchError::RateLimited.into();
        assert!(matches!(err, ReindexError::TransientIndex(_)));
    }
}
