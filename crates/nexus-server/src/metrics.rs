//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. The returned handle
/// renders the `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "nexus_connections_total";
/// Connections terminated (counter).
pub const DISCONNECTIONS_TOTAL: &str = "nexus_disconnections_total";
/// Live connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "nexus_connections_active";
/// Packets decoded from inbound frames (counter).
pub const PACKETS_RECEIVED_TOTAL: &str = "nexus_packets_received_total";
/// Packets written to transports (counter).
pub const PACKETS_SENT_TOTAL: &str = "nexus_packets_sent_total";
/// Frames that failed to decode (counter).
pub const DECODE_ERRORS_TOTAL: &str = "nexus_decode_errors_total";
/// Frames that failed to write (counter).
pub const WRITE_ERRORS_TOTAL: &str = "nexus_write_errors_total";
/// Packets dropped by dispatch (counter, labels: reason).
pub const PACKETS_REJECTED_TOTAL: &str = "nexus_packets_rejected_total";
/// Stream handlers started (counter, labels: type).
pub const STREAMS_STARTED_TOTAL: &str = "nexus_streams_started_total";
/// Streams cancelled by kill packets (counter).
pub const STREAMS_KILLED_TOTAL: &str = "nexus_streams_killed_total";
/// Running stream handlers (gauge).
pub const STREAMS_ACTIVE: &str = "nexus_streams_active";
/// Packets refused by a full or closed outbound queue (counter).
pub const SEND_DROPS_TOTAL: &str = "nexus_send_drops_total";
