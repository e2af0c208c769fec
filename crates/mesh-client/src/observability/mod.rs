//! Observability for the mesh client.
//!
//! The client records through the `metrics` facade only. Without an
//! installed recorder every call is a no-op; embedders that want the numbers
//! install their own exporter.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mesh_connections_active` | Gauge | none | Live participant connections |
//! | `mesh_connections_created_total` | Counter | none | Endpoints created |
//! | `mesh_ice_restarts_total` | Counter | none | ICE restart attempts |
//! | `mesh_connection_recreations_total` | Counter | `reason` | Full endpoint recreations |
//! | `mesh_health_timeouts_total` | Counter | none | Health timers that forced recovery |
//! | `mesh_negotiation_errors_total` | Counter | `stage` | Offer/answer/candidate failures |
//! | `mesh_signaling_reconnects_total` | Counter | none | Successful signaling reconnects |

pub mod metrics;
