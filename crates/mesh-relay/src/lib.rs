//! Signaling relay for the mesh meeting system.
//!
//! The relay keeps rooms keyed by meeting id and fans envelopes out between
//! the sockets in a room. It never inspects SDP or candidate payloads.
//!
//! # Architecture
//!
//! ```text
//! socket task (one per WebSocket)
//!     │ decode
//!     ▼
//! RelayHub ── RelayRooms::handle ──► Vec<Delivery>
//!     │ try_send
//!     ▼
//! per-socket outbound queue ──► socket task ──► encode ──► WebSocket
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod hub;
pub mod observability;
pub mod rooms;
pub mod server;

pub use hub::RelayHub;
pub use rooms::{Delivery, RelayRooms};
pub use server::{relay_router, RelayState};
