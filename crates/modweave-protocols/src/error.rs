//! Protocol-level error types.

use thiserror::Error;

/// Errors raised by collaborator implementations (loaders, runners).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Module lookup failed for a reason other than absence.
    #[error("Module load failed: {name} - {reason}")]
    LoadFailed { name: String, reason: String },

    /// Runner could not produce an envelope.
    #[error("Module run failed: {0}")]
    RunFailed(String),

    /// Provider backend error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Custom(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failed_display() {
        let err = ProtocolError::LoadFailed {
            name: "summarizer".to_string(),
            reason: "permission denied".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("summarizer"));
        assert!(display.contains("permission denied"));
    }

    #[test]
    fn test_serialization_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ProtocolError::from(json_err);
        assert!(err.to_string().starts_with("Serialization error"));
    }
}
