//! # Mesh Test Utilities
//!
//! Mocks and fixtures for exercising the mesh client without a browser-grade
//! media stack, real devices or a network.
//!
//! - `mock_endpoint` - scriptable media endpoints that record every call
//! - `mock_capture` - capture device that can be told to fail
//! - `mock_membership` - in-memory membership service
//! - `local_relay` - in-process relay over `mesh_relay::rooms::RelayRooms`
//! - `fixtures` - peers, offers, candidates and wired-up client stacks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let mut harness = OrchestratorHarness::new("alice");
//!     harness.deliver(existing(&[peer("bob", "sock-b")])).await;
//!
//!     harness.endpoint("sock-b").emit_ice_state(IceConnectionState::Failed);
//!     let state = harness.state().await;
//! }
//! ```

pub mod fixtures;
pub mod local_relay;
pub mod mock_capture;
pub mod mock_endpoint;
pub mod mock_membership;

pub use fixtures::*;
pub use local_relay::*;
pub use mock_capture::*;
pub use mock_endpoint::*;
pub use mock_membership::*;
