//! Metric recording functions for the mesh client.
//!
//! Labels are bounded: `reason` takes the recreation reasons below, `stage`
//! takes [`NegotiationError::stage`](crate::errors::NegotiationError::stage).

use metrics::{counter, gauge};

/// Recreation after an ICE restart call itself failed.
pub const REASON_RESTART_FAILED: &str = "restart_failed";
/// Recreation after the restart budget ran out.
pub const REASON_ATTEMPTS_EXHAUSTED: &str = "attempts_exhausted";
/// Recreation forced by the health timer.
pub const REASON_HEALTH_TIMEOUT: &str = "health_timeout";
/// Recreation after the overall peer state reported `failed`.
pub const REASON_PEER_FAILED: &str = "peer_failed";

/// Set the number of live participant connections.
///
/// Metric: `mesh_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic mesh sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_connections_active").set(count as f64);
}

/// Metric: `mesh_connections_created_total`
pub fn record_connection_created() {
    counter!("mesh_connections_created_total").increment(1);
}

/// Metric: `mesh_ice_restarts_total`
pub fn record_ice_restart() {
    counter!("mesh_ice_restarts_total").increment(1);
}

/// Metric: `mesh_connection_recreations_total`
/// Labels: `reason`
pub fn record_recreation(reason: &'static str) {
    counter!("mesh_connection_recreations_total", "reason" => reason).increment(1);
}

/// Metric: `mesh_health_timeouts_total`
pub fn record_health_timeout() {
    counter!("mesh_health_timeouts_total").increment(1);
}

/// Metric: `mesh_negotiation_errors_total`
/// Labels: `stage`
pub fn record_negotiation_error(stage: &'static str) {
    counter!("mesh_negotiation_errors_total", "stage" => stage).increment(1);
}

/// Metric: `mesh_signaling_reconnects_total`
pub fn record_signaling_reconnect() {
    counter!("mesh_signaling_reconnects_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the global no-op recorder; they exercise the
    // recording paths without asserting values.

    #[test]
    fn test_set_connections_active() {
        set_connections_active(0);
        set_connections_active(3);
        set_connections_active(49);
    }

    #[test]
    fn test_record_recreation_reasons() {
        for reason in [
            REASON_RESTART_FAILED,
            REASON_ATTEMPTS_EXHAUSTED,
            REASON_HEALTH_TIMEOUT,
            REASON_PEER_FAILED,
        ] {
            record_recreation(reason);
        }
    }

    #[test]
    fn test_counters() {
        record_connection_created();
        record_ice_restart();
        record_health_timeout();
        record_negotiation_error("offer");
        record_signaling_reconnect();
    }

    #[test]
    fn test_metrics_reach_debugging_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_connections_active(2);
            record_connection_created();
            record_ice_restart();
            record_recreation(REASON_HEALTH_TIMEOUT);
            record_health_timeout();
            record_negotiation_error("answer");
            record_signaling_reconnect();
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "mesh_connections_active",
            "mesh_connections_created_total",
            "mesh_ice_restarts_total",
            "mesh_connection_recreations_total",
            "mesh_health_timeouts_total",
            "mesh_negotiation_errors_total",
            "mesh_signaling_reconnects_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}"
            );
        }
    }
}
