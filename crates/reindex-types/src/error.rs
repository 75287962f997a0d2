//! Error types for the reindexing pipeline.

use thiserror::Error;

/// Unified error type for reindex operations.
#[derive(Debug, Error)]
pub enum ReindexError {
    /// Operator supplied malformed ids, types or field lists
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A logical id or document identifier could not be encoded/decoded
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Network or service failure on a single index call
    #[error("Transient index error: {0}")]
    TransientIndex(String),

    /// A partial update cannot be applied because the split structure changed
    #[error("Structural mismatch for item {item_id}: {reason}")]
    StructuralMismatch { item_id: String, reason: String },

    /// Missing credentials, index name or invalid limits
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReindexError {
    /// Whether this error only affects the chunk that raised it.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReindexError::TransientIndex(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReindexError::InvalidIdentifier("empty logical id".to_string());
        assert_eq!(err.to_string(), "Invalid identifier: empty logical id");

        let err = ReindexError::StructuralMismatch {
            item_id: "42".to_string(),
            reason: "slot count changed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Structural mismatch for item 42: slot count changed"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(ReindexError::TransientIndex("timeout".into()).is_transient());
        assert!(!ReindexError::Configuration("no app id".into()).is_transient());
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: ReindexError = json_err.into();
        assert!(matches!(err, ReindexError::Serialization(_)));
    }
}
