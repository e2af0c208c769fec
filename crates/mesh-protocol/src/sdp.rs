//! Session description and ICE candidate values as they travel on the wire.
//!
//! Field names follow the browser `RTCSessionDescriptionInit` /
//! `RTCIceCandidateInit` dictionaries so that any WebRTC stack can consume
//! them directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The `type` member of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An SDP offer or answer.
///
/// `Debug` prints only the type and body length; SDP bodies carry ICE
/// credentials and must not reach the logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Length of the SDP body in bytes, for logging.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sdp.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sdp.is_empty()
    }
}

impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescription")
            .field("sdp_type", &self.sdp_type)
            .field("sdp_len", &self.sdp.len())
            .finish()
    }
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_description_uses_browser_field_names() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_description_debug_hides_body() {
        let desc = SessionDescription::answer("a=ice-pwd:secretpassword");
        let debug = format!("{desc:?}");
        assert!(debug.contains("Answer"));
        assert!(!debug.contains("secretpassword"));
    }

    #[test]
    fn test_candidate_accepts_browser_json() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.1 54321 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let cand: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(cand.sdp_mid.as_deref(), Some("0"));
        assert_eq!(cand.sdp_mline_index, Some(0));
        assert!(cand.username_fragment.is_none());
    }

    #[test]
    fn test_candidate_omits_absent_fields() {
        let cand = IceCandidate::new("candidate:x");
        let json = serde_json::to_string(&cand).unwrap();
        assert_eq!(json, r#"{"candidate":"candidate:x"}"#);
    }
}
