//! `/health` endpoint.

use serde::Serialize;
use tokio::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the scheduler runs, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered channels.
    pub channels: usize,
    /// Scheduler lifecycle state.
    pub scheduler: String,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, channels: usize, scheduler: &str) -> HealthResponse {
    let status = if scheduler == "running" { "ok" } else { "degraded" };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        channels,
        scheduler: scheduler.into(),
    }
}
