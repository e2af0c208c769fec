//! Observability for the relay.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mesh_relay_rooms_active` | Gauge | none | Rooms with at least one member |
//! | `mesh_relay_sockets_active` | Gauge | none | Connected sockets |
//! | `mesh_relay_envelopes_total` | Counter | `event` | Envelopes received, by kind |
//! | `mesh_relay_frames_rejected_total` | Counter | none | Frames that failed to decode |
//! | `mesh_relay_deliveries_dropped_total` | Counter | none | Deliveries to a full or closed socket |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
