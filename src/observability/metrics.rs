//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_pairs_opened_total` (counter): client connections accepted into a pair
//! - `proxy_active_pairs` (gauge): pairs whose client connection is still open
//! - `proxy_bytes_forwarded_total` (counter): body bytes moved, by `direction`
//! - `proxy_connection_shutdowns_total` (counter): abrupt shutdowns, by `side` and `reason`
//! - `proxy_origin_connect_failures_total` (counter): failed origin connects
//! - `proxy_keep_alive_total` (counter): exchanges finished, by `side` and `reused`

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Installs the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_pair_opened() {
    metrics::counter!("proxy_pairs_opened_total").increment(1);
    metrics::gauge!("proxy_active_pairs").increment(1.0);
}

pub fn record_pair_closed() {
    metrics::gauge!("proxy_active_pairs").decrement(1.0);
}

pub fn record_bytes_forwarded(direction: &'static str, bytes: usize) {
    metrics::counter!("proxy_bytes_forwarded_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_shutdown(side: &'static str, reason: &'static str) {
    metrics::counter!("proxy_connection_shutdowns_total", "side" => side, "reason" => reason).increment(1);
}

pub fn record_connect_failure() {
    metrics::counter!("proxy_origin_connect_failures_total").increment(1);
}

pub fn record_exchange_finished(side: &'static str, reused: bool) {
    let reused = if reused { "true" } else { "false" };
    metrics::counter!("proxy_keep_alive_total", "side" => side, "reused" => reused).increment(1);
}
