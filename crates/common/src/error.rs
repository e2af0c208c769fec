//! Common error types for mesh meeting components.

use thiserror::Error;

/// Errors shared by the client, relay and protocol crates.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Signaling transport failed (socket closed, connect timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// An actor mailbox or reply channel is gone.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Serialization(err.to_string())
    }
}

/// Result type alias using `MeshError`
pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_converts_to_serialization() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let mesh: MeshError = err.into();
        assert!(matches!(mesh, MeshError::Serialization(_)));
    }

    #[test]
    fn test_display_includes_detail() {
        let err = MeshError::ChannelClosed("orchestrator mailbox".to_string());
        assert_eq!(err.to_string(), "Channel closed: orchestrator mailbox");
    }
}
