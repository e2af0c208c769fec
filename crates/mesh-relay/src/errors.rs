//! Relay error types.

use mesh_protocol::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to bind {address}: {message}")]
    Bind { address: String, message: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl RelayError {
    /// Message sent back to a client in an `error` envelope.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Codec(e) => format!("Malformed message: {e}"),
            RelayError::Bind { .. } | RelayError::Server(_) | RelayError::Metrics(_) => {
                "Internal relay error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = RelayError::Bind {
            address: "0.0.0.0:5002".to_string(),
            message: "address in use".to_string(),
        };
        assert_eq!(err.client_message(), "Internal relay error");
    }
}
