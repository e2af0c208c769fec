//! Text-frame codec for signaling envelopes.

use crate::envelope::{EnvelopeKind, SignalingEnvelope};
use serde::Deserialize;

/// Default upper bound on one encoded frame. Large enough for an SDP offer
/// carrying audio, camera video and a screen track.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame exceeds the configured limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame is not a JSON object with `event` and `data`
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    /// `event` names no known envelope kind
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Known event with a payload that does not match its schema
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EnvelopeKind, reason: String },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Size-limited envelope codec.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    max_frame_bytes: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Encode an envelope to a text frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if the encoded frame exceeds the limit.
    pub fn encode(&self, envelope: &SignalingEnvelope) -> Result<String, CodecError> {
        let text = serde_json::to_string(envelope)
            .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;
        self.check_size(text.len())?;
        Ok(text)
    }

    /// Decode a text frame.
    ///
    /// Unknown events are reported separately from malformed payloads so the
    /// relay can answer with a precise `error` envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is oversized, not an event object, names
    /// an unknown event, or carries a payload that does not match the event.
    pub fn decode(&self, text: &str) -> Result<SignalingEnvelope, CodecError> {
        self.check_size(text.len())?;

        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

        let kind = EnvelopeKind::from_event(&raw.event)
            .ok_or_else(|| CodecError::UnknownEvent(raw.event.clone()))?;

        let tagged = serde_json::json!({ "event": raw.event, "data": raw.data });
        serde_json::from_value(tagged).map_err(|e| CodecError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }

    fn check_size(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_bytes,
            });
        }
        Ok(())
    }
}

/// Encode with the default frame limit.
///
/// # Errors
///
/// See [`EnvelopeCodec::encode`].
pub fn encode_envelope(envelope: &SignalingEnvelope) -> Result<String, CodecError> {
    EnvelopeCodec::default().encode(envelope)
}

/// Decode with the default frame limit.
///
/// # Errors
///
/// See [`EnvelopeCodec::decode`].
pub fn decode_envelope(text: &str) -> Result<SignalingEnvelope, CodecError> {
    EnvelopeCodec::default().decode(text)
}
