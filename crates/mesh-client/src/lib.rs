//! Mesh Client Library
//!
//! A full-mesh meeting client: every participant holds one media connection
//! to every other participant, negotiated over a WebSocket relay.
//!
//! # Architecture
//!
//! ```text
//! SessionController
//! ├── MembershipService (REST: users, meetings, roster)
//! ├── SignalingClient (reconnecting WebSocket to the relay)
//! └── ConnectionOrchestrator
//!     ├── ConnectionRegistry -> MediaEndpoint (one per remote session)
//!     ├── TaskScheduler (health timers, ICE restarts, recreation)
//!     └── LocalCaptureManager + TrackRenegotiationManager
//! ```
//!
//! # Key Design Decisions
//!
//! - **Keyed by session**: connections are keyed by the relay session id, so
//!   a user who reconnects is a new peer
//! - **Single owner**: the orchestrator actor is the only writer of
//!   connection state; endpoint callbacks and timers post messages to it
//! - **Epoch tagging**: events from a replaced endpoint are dropped
//! - **Bounded recovery**: at most three ICE restarts, then a full
//!   recreation, never for a participant that has left
//!
//! # Modules
//!
//! - [`actors`] - Session controller and connection orchestrator
//! - [`media`] - Local capture, tracks and the media endpoint abstraction
//! - [`signaling`] - Relay transport
//! - [`membership`] - Membership REST client
//! - [`chat`] - Chat messages and unread tracking
//! - [`presence`] - Local media status publishing
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Metrics

#![warn(clippy::pedantic)]

pub mod actors;
pub mod chat;
pub mod config;
pub mod errors;
pub mod media;
pub mod membership;
pub mod observability;
pub mod presence;
pub mod signaling;
