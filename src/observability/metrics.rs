//! Metrics collection and exposition.
//!
//! # Metrics
//! - `storehub_requests_total` (counter): requests by method, status
//! - `storehub_request_duration_seconds` (histogram): latency distribution
//! - `storehub_rate_limited_total` (counter): admission denials
//! - `storehub_panics_total` (counter): panics caught by the barrier
//! - `storehub_limiter_entries` (gauge): live rate-limit entries after a sweep
//! - `storehub_active_connections` (gauge): current connection count
//! - `storehub_forced_closures_total` (counter): connections aborted at drain timeout
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in (`observability.metrics_enabled`)

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::time::Instant;

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    counter!(
        "storehub_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("storehub_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("storehub_rate_limited_total").increment(1);
}

pub fn record_panic() {
    counter!("storehub_panics_total").increment(1);
}

pub fn set_limiter_entries(count: usize) {
    gauge!("storehub_limiter_entries").set(count as f64);
}

pub fn set_active_connections(count: u64) {
    gauge!("storehub_active_connections").set(count as f64);
}

pub fn record_forced_closures(count: usize) {
    counter!("storehub_forced_closures_total").increment(count as u64);
}
