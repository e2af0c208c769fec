//! Actor model implementation for the mesh client.
//!
//! ```text
//! SessionController (one per client)
//! ├── owns the inbound signaling stream and the membership client
//! └── drives ConnectionOrchestrator
//!     ├── owns the ConnectionRegistry (one record per remote session)
//!     ├── owns the TaskScheduler (health, restart, recreation timers)
//!     └── owns local capture and track renegotiation
//! ```
//!
//! All inter-actor communication goes through `tokio::sync::mpsc`
//! mailboxes. Endpoint observers and timers never touch state directly;
//! they post back into the orchestrator's mailbox.
//!
//! # Modules
//!
//! - [`orchestrator`] - `ConnectionOrchestrator`, connection lifecycle and recovery
//! - [`session`] - `SessionController`, lobby/room lifecycle
//! - [`registry`] - Connection records and buffered candidates
//! - [`scheduler`] - Cancellable per-connection timers
//! - [`renegotiation`] - Track replacement across live connections
//! - [`messages`] - Message types for actor communication

pub mod messages;
pub mod orchestrator;
pub mod registry;
pub mod renegotiation;
pub mod scheduler;
pub mod session;

pub use messages::*;
pub use orchestrator::{ConnectionOrchestrator, OrchestratorDeps, OrchestratorHandle};
pub use registry::{ConnectionRegistry, ConnectionState, ParticipantConnection};
pub use renegotiation::{InstallOutcome, TrackRenegotiationManager};
pub use scheduler::{TaskKind, TaskScheduler};
pub use session::{SessionController, SessionDeps, SessionHandle};
