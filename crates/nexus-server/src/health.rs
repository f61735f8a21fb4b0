//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connections currently in the pool.
    pub connections: usize,
    /// Stream handlers currently registered across all connections.
    pub active_streams: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, active_streams: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_streams,
    }
}
