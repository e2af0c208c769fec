//! Secret types that keep credentials out of logs.
//!
//! TURN credentials are the only secret the mesh client handles. They are
//! read from the environment, passed to the media stack, and must never show
//! up in `Debug` output or tracing fields.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let credential = SecretString::from("turn-password");
//! assert!(!format!("{credential:?}").contains("turn-password"));
//! assert_eq!(credential.expose_secret(), "turn-password");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Username/credential pair for a TURN relay.
#[derive(Debug, Clone)]
pub struct TurnCredential {
    /// TURN username. Not secret on its own.
    pub username: String,
    /// TURN credential (password). Redacted in `Debug`.
    pub credential: SecretString,
}

impl TurnCredential {
    /// Build a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: SecretString::from(credential.into()),
        }
    }
}
