//! Metrics collection and exposition.
//!
//! # Metrics
//! - `certs_state_total` (counter): classifications by domain, state
//! - `certs_issuance_total` (counter): issuance attempts by domain, outcome
//! - `proxy_reloads_total` (counter): reloads by source, outcome
//! - `watcher_skipped_cycles_total` (counter): skipped watcher cycles by reason
//!
//! Without an installed exporter the metrics crate's no-op recorder
//! swallows every update.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_certificate_state(domain: &str, state: &'static str) {
    metrics::counter!("certs_state_total", "domain" => domain.to_string(), "state" => state).increment(1);
}

pub fn record_issuance(domain: &str, outcome: &'static str) {
    metrics::counter!("certs_issuance_total", "domain" => domain.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_reload(source: &'static str, outcome: &'static str) {
    metrics::counter!("proxy_reloads_total", "source" => source, "outcome" => outcome).increment(1);
}

pub fn record_watcher_skip(reason: &'static str) {
    metrics::counter!("watcher_skipped_cycles_total", "reason" => reason).increment(1);
}
