//! Mesh client error types.
//!
//! Negotiation errors stay inside the orchestrator; capture and membership
//! errors become user-visible notices through [`ClientError::client_message`].

use crate::media::track::MediaKind;
use thiserror::Error;

/// Failure applying or producing negotiation state on one media endpoint.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Endpoint creation failed: {0}")]
    EndpointCreation(String),

    #[error("Setting local description failed: {0}")]
    LocalDescription(String),

    #[error("Setting remote description failed: {0}")]
    RemoteDescription(String),

    #[error("Creating offer failed: {0}")]
    Offer(String),

    #[error("Creating answer failed: {0}")]
    Answer(String),

    #[error("Adding ICE candidate failed: {0}")]
    Candidate(String),

    /// No outbound sender carries this kind.
    #[error("No {0} sender on endpoint")]
    NoSender(MediaKind),

    #[error("Track replacement failed: {0}")]
    TrackReplace(String),

    #[error("Closing endpoint failed: {0}")]
    Close(String),

    /// The endpoint was already closed.
    #[error("Endpoint closed")]
    Closed,
}

impl NegotiationError {
    /// Bounded label for `mesh_negotiation_errors_total`.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            NegotiationError::EndpointCreation(_) => "create",
            NegotiationError::LocalDescription(_) => "local_description",
            NegotiationError::RemoteDescription(_) => "remote_description",
            NegotiationError::Offer(_) => "offer",
            NegotiationError::Answer(_) => "answer",
            NegotiationError::Candidate(_) => "candidate",
            NegotiationError::NoSender(_) | NegotiationError::TrackReplace(_) => "track",
            NegotiationError::Close(_) => "close",
            NegotiationError::Closed => "closed",
        }
    }
}

/// Local capture device failure.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Operation needs local media that was never acquired.
    #[error("Local media not active")]
    NotActive,
}

impl CaptureError {
    /// Blocking notice shown to the user.
    #[must_use]
    pub fn notice(&self) -> String {
        match self {
            CaptureError::PermissionDenied(_) => {
                "Camera or microphone permission was denied. You can still follow the meeting."
                    .to_string()
            }
            CaptureError::DeviceUnavailable(_) => {
                "Camera or microphone is unavailable. You can still follow the meeting.".to_string()
            }
            CaptureError::NotActive => "Local media is not active".to_string(),
        }
    }
}

/// Membership service call failure.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Membership service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Mesh client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Operation is not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A host leave must be confirmed because it ends the meeting.
    #[error("Host must confirm ending the meeting")]
    HostConfirmationRequired,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ClientError::Capture(e) => e.notice(),
            ClientError::Membership(MembershipError::Status { message, .. }) => message.clone(),
            ClientError::Membership(_) => "The meeting service could not be reached".to_string(),
            ClientError::Signaling(_) => "Lost connection to the meeting".to_string(),
            ClientError::HostConfirmationRequired => {
                "Leaving will end the meeting for everyone".to_string()
            }
            ClientError::InvalidState(msg) => msg.clone(),
            ClientError::Negotiation(_) | ClientError::Config(_) | ClientError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}
