//! `/api/health` endpoint.

use std::time::Instant;

use chrono::Utc;
use gymcast_core::events::format_timestamp;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"OK"` when the server is running.
    pub status: String,
    /// Current server time.
    pub timestamp: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Deployment environment label.
    pub environment: String,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Channels with at least one member.
    pub channels: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    environment: &str,
    connections: usize,
    channels: usize,
) -> HealthResponse {
    HealthResponse {
        status: "OK".into(),
        timestamp: format_timestamp(Utc::now()),
        uptime_secs: start_time.elapsed().as_secs(),
        environment: environment.to_owned(),
        connections,
        channels,
    }
}
