//! Signaling protocol for the mesh meeting system.
//!
//! Every message between a client and the relay is one JSON text frame of
//! the shape `{"event": "<kebab-case kind>", "data": {...}}`. This crate owns
//! the envelope types, the SDP/candidate value types they carry, and the
//! size-limited text codec.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod envelope;
pub mod sdp;

pub use codec::{decode_envelope, encode_envelope, CodecError, EnvelopeCodec};
pub use envelope::*;
pub use sdp::{IceCandidate, SdpType, SessionDescription};
