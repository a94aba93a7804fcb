//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switchyard_dispatch_total` (counter): requests by method and outcome
//!   (`handled`, `not_found`, `error`)
//! - `switchyard_dispatch_duration_seconds` (histogram): time spent in `App::handle`
//! - `switchyard_handler_panics_total` (counter): panics caught at handler boundaries
//! - `switchyard_options_auto_total` (counter): automatic OPTIONS replies
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "Failed to install metrics exporter"),
    }
}

/// Record one top-level dispatch.
pub fn record_dispatch(method: &str, outcome: &'static str, started: Instant) {
    metrics::counter!(
        "switchyard_dispatch_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("switchyard_dispatch_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_handler_panic() {
    metrics::counter!("switchyard_handler_panics_total").increment(1);
}

pub fn record_options_response() {
    metrics::counter!("switchyard_options_auto_total").increment(1);
}
