//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_dispatch_requests_total` (counter): dispatch decisions by outcome
//! - `edge_orphaned_declarations_total` (counter): matched declarations with no function
//! - `edge_bootstrap_duration_seconds` (histogram): sandbox startup time by result
//! - `edge_registry_refreshes_total` (counter): applied registry refreshes
//! - `edge_registry_functions` (gauge): functions in the current snapshot
//! - `edge_proxy_requests_total` / `edge_proxy_request_duration_seconds`: forwarded requests
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests and
//!   metrics-disabled runs pay nothing
//! - Prometheus endpoint is served by the exporter's own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Outcome of one dispatch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Request already carried the passthrough marker.
    Passthrough,
    /// No edge functions configured at all.
    Disabled,
    /// Sandbox failed to start.
    Unavailable,
    /// Registry refresh failed.
    RefreshFailed,
    /// Nothing bound to the path.
    Unmatched,
    /// Routed to the sandbox.
    Routed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Passthrough => "passthrough",
            DispatchOutcome::Disabled => "disabled",
            DispatchOutcome::Unavailable => "unavailable",
            DispatchOutcome::RefreshFailed => "refresh_failed",
            DispatchOutcome::Unmatched => "unmatched",
            DispatchOutcome::Routed => "routed",
        }
    }
}

/// Install the Prometheus recorder and serve it on `addr`.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_dispatch(outcome: DispatchOutcome) {
    ::metrics::counter!("edge_dispatch_requests_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_orphaned(count: usize) {
    ::metrics::counter!("edge_orphaned_declarations_total").increment(count as u64);
}

pub fn record_bootstrap(started: Instant, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    ::metrics::histogram!("edge_bootstrap_duration_seconds", "result" => result)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_refresh(functions: usize) {
    ::metrics::counter!("edge_registry_refreshes_total").increment(1);
    ::metrics::gauge!("edge_registry_functions").set(functions as f64);
}

/// Record a forwarded request. `target` is "edge" or "origin".
pub fn record_request(method: &str, status: u16, target: &'static str, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    ::metrics::counter!(
        "edge_proxy_requests_total",
        "method" => method.clone(),
        "status" => status.clone(),
        "target" => target
    )
    .increment(1);
    ::metrics::histogram!(
        "edge_proxy_request_duration_seconds",
        "method" => method,
        "status" => status,
        "target" => target
    )
    .record(start.elapsed().as_secs_f64());
}
