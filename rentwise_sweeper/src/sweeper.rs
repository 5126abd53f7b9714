//! Periodic purge of rate limit records and expired sessions.

use crate::{logging, metrics};
use rentwise_auth::auth::{AuthError, SessionManager};
use rentwise_auth::security::{RateLimitError, RateLimiter};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Sweep errors
#[derive(Debug, Error)]
pub enum SweepError {
    /// Rate limit records could not be purged
    #[error("Rate limit cleanup failed: {0}")]
    RateLimits(#[from] RateLimitError),

    /// Sessions could not be purged
    #[error("Session cleanup failed: {0}")]
    Sessions(#[from] AuthError),
}

impl SweepError {
    fn stage(&self) -> &'static str {
        match self {
            SweepError::RateLimits(_) => "rate_limits",
            SweepError::Sessions(_) => "sessions",
        }
    }
}

/// Records removed by one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub rate_limit_records: u64,
    pub sessions: u64,
}

/// Retention job
pub struct Sweeper {
    limiter: RateLimiter,
    sessions: SessionManager,
}

impl Sweeper {
    pub fn new(limiter: RateLimiter, sessions: SessionManager) -> Self {
        Self { limiter, sessions }
    }

    /// Run a single sweep
    ///
    /// # Errors
    ///
    /// Stops at the first stage that fails. Nothing already removed is
    /// restored.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let started = Instant::now();

        let result = async {
            let rate_limit_records = self.limiter.cleanup_rate_limits().await?;
            let sessions = self.sessions.cleanup_expired_sessions().await?;
            Ok::<_, SweepError>(SweepReport {
                rate_limit_records,
                sessions,
            })
        }
        .await;

        match &result {
            Ok(report) => {
                let elapsed = started.elapsed();
                logging::log_sweep(
                    report.rate_limit_records,
                    report.sessions,
                    elapsed.as_millis() as u64,
                );
                metrics::sweep_completed(
                    report.rate_limit_records,
                    report.sessions,
                    elapsed.as_secs_f64() * 1000.0,
                );
            }
            Err(e) => {
                tracing::error!(stage = e.stage(), "Sweep failed: {}", e);
                metrics::sweep_failed(e.stage());
            }
        }

        result
    }

    /// Sweep every `interval` until `shutdown` turns true or its sender is
    /// dropped
    ///
    /// The first sweep runs immediately. A failed sweep is logged and the
    /// loop carries on. Returns the number of sweeps attempted.
    pub async fn run_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeps = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    sweeps += 1;
                    let _ = self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(sweeps = sweeps, "Sweeper stopped");
        sweeps
    }
}
