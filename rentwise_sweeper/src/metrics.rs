//! Prometheus metrics for the retention job.
//!
//! Metrics are exposed in Prometheus text format when an exporter address is
//! configured. Without one the recording functions are no-ops.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use rentwise_sweeper::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::sweep_completed(12, 3, 40.0);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

/// Record a completed sweep.
pub fn sweep_completed(rate_limit_records: u64, sessions: u64, duration_ms: f64) {
    metrics::counter!("sweeps_total", "outcome" => "success").increment(1);
    metrics::counter!("rate_limit_records_removed_total").increment(rate_limit_records);
    metrics::counter!("sessions_removed_total").increment(sessions);
    metrics::histogram!("sweep_duration_ms").record(duration_ms);
}

/// Record a failed sweep.
pub fn sweep_failed(stage: &'static str) {
    metrics::counter!("sweeps_total", "outcome" => "failure", "stage" => stage).increment(1);
}
