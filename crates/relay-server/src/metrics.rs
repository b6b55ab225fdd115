//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Call once, before any metric
/// is recorded; a second call fails because the global slot is taken.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Inbound frames decoded (counter, labels: type).
pub const RELAY_FRAMES_RECEIVED_TOTAL: &str = "relay_frames_received_total";
/// Frames forwarded to the other role (counter, labels: type).
pub const RELAY_FRAMES_FORWARDED_TOTAL: &str = "relay_frames_forwarded_total";
/// Inbound frames that failed to decode (counter, labels: reason).
pub const RELAY_DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const RELAY_DROPPED_FRAMES_TOTAL: &str = "relay_dropped_frames_total";
/// Connections closed by the liveness monitor (counter).
pub const RELAY_LIVENESS_EVICTIONS_TOTAL: &str = "relay_liveness_evictions_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(WS_CONNECTIONS_TOTAL).increment(2);
        });
        let output = render(&handle);
        assert!(output.contains("ws_connections_total 2"), "{output}");
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            RELAY_FRAMES_RECEIVED_TOTAL,
            RELAY_FRAMES_FORWARDED_TOTAL,
            RELAY_DECODE_ERRORS_TOTAL,
            RELAY_DROPPED_FRAMES_TOTAL,
            RELAY_LIVENESS_EVICTIONS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
