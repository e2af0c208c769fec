//! Metric recording functions for the relay.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// # Errors
///
/// Returns an error string if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Metric: `mesh_relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_relay_rooms_active").set(count as f64);
}

/// Metric: `mesh_relay_sockets_active`
pub fn set_sockets_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_relay_sockets_active").set(count as f64);
}

/// Metric: `mesh_relay_envelopes_total`
/// Labels: `event` (one of the fixed envelope kinds)
pub fn record_envelope(event: &'static str) {
    counter!("mesh_relay_envelopes_total", "event" => event).increment(1);
}

/// Metric: `mesh_relay_frames_rejected_total`
pub fn record_frame_rejected() {
    counter!("mesh_relay_frames_rejected_total").increment(1);
}

/// Metric: `mesh_relay_deliveries_dropped_total`
pub fn record_delivery_dropped() {
    counter!("mesh_relay_deliveries_dropped_total").increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_envelope_counter_labelled_by_event() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_envelope("join");
            record_envelope("join");
            record_envelope("offer");
            set_rooms_active(2);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let joins = snapshot
            .iter()
            .find(|(key, _, _, _)| {
                key.key().name() == "mesh_relay_envelopes_total"
                    && key.key().labels().any(|l| l.value() == "join")
            })
            .map(|(_, _, _, value)| value.clone())
            .expect("join counter recorded");
        assert_eq!(*joins, DebugValue::Counter(2));

        let rooms = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "mesh_relay_rooms_active")
            .map(|(_, _, _, value)| value.clone())
            .expect("rooms gauge recorded");
        assert_eq!(*rooms, DebugValue::Gauge(2.0.into()));
    }
}
