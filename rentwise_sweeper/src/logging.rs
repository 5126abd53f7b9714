//! Structured logging configuration.
//!
//! `rentwise_auth` logs through the `log` facade. The subscriber installed
//! here picks those records up as well, so library and binary output share
//! one filter and one format.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, defaulting to `info,sqlx=warn`.
///
/// # Example
///
/// ```no_run
/// use rentwise_sweeper::logging;
///
/// logging::init();
/// tracing::info!("Sweeper starting");
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log the outcome of one sweep
///
/// # Arguments
///
/// * `rate_limit_records` - Rate limit records removed
/// * `sessions` - Sessions removed
/// * `duration_ms` - Duration in milliseconds
pub fn log_sweep(rate_limit_records: u64, sessions: u64, duration_ms: u64) {
    if duration_ms > 10_000 {
        tracing::warn!(
            rate_limit_records = rate_limit_records,
            sessions = sessions,
            duration_ms = duration_ms,
            "Slow sweep"
        );
    } else {
        tracing::info!(
            rate_limit_records = rate_limit_records,
            sessions = sessions,
            duration_ms = duration_ms,
            "Sweep completed"
        );
    }
}
