//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::ServerError;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails when another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Names recorded by the server crate. The driver records
// `eventhub_events_posted_total`, `eventhub_events_sent_total`,
// `eventhub_events_received_total`, `eventhub_bind_total`,
// `eventhub_bind_rejected_total`, `eventhub_channels_active` and
// `eventhub_scheduler_pass_seconds`.

/// WebSocket sessions opened (counter).
pub const SOCKET_CONNECTIONS_TOTAL: &str = "eventhub_socket_connections_total";
/// Open WebSocket sessions (gauge).
pub const SOCKET_CONNECTIONS_ACTIVE: &str = "eventhub_socket_connections_active";
/// WebSocket session duration (histogram).
pub const SOCKET_DURATION_SECONDS: &str = "eventhub_socket_duration_seconds";
/// SSE streams opened (counter).
pub const STREAM_CONNECTIONS_TOTAL: &str = "eventhub_stream_connections_total";
/// Open SSE streams (gauge).
pub const STREAM_CONNECTIONS_ACTIVE: &str = "eventhub_stream_connections_active";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        for name in [
            SOCKET_CONNECTIONS_TOTAL,
            SOCKET_CONNECTIONS_ACTIVE,
            SOCKET_DURATION_SECONDS,
            STREAM_CONNECTIONS_TOTAL,
            STREAM_CONNECTIONS_ACTIVE,
        ] {
            assert!(name.starts_with("eventhub_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
