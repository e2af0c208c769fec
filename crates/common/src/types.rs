//! Identifier types shared by the client and the relay.
//!
//! All identifiers travel as plain JSON strings on the wire, so each newtype
//! is `#[serde(transparent)]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a meeting (also the relay room name).
    MeetingId
);

string_id!(
    /// Identifier of a user account. A user may hold several sessions over time.
    UserId
);

string_id!(
    /// Relay-assigned identifier of one signaling socket.
    ///
    /// This is the stable key for a peer connection: a user who reconnects
    /// gets a new session id.
    SessionId
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = SessionId::from("sock-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sock-1\"");

        let back: SessionId = serde_json::from_str("\"sock-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_random_ids_are_unique() {
        assert_ne!(MeetingId::new(), MeetingId::new());
    }

    #[test]
    fn test_display_matches_inner() {
        let user = UserId::from("alice");
        assert_eq!(user.to_string(), "alice");
        assert_eq!(user.as_str(), "alice");
    }
}
