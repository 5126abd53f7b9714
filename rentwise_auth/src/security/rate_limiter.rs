//! Sliding window rate limiting per user and endpoint.

use super::errors::{RateLimitError, RateLimiterResult};
use crate::auth::UserId;
use crate::clock::{Clock, SystemClock};
use crate::config::parse_env_nonzero_or;
use crate::db::{RateLimitStore, WindowUsage};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

/// Login endpoint key
pub const LOGIN_ENDPOINT: &str = "POST /api/auth/login";

/// Maintenance ticket creation endpoint key
pub const TICKET_CREATION_ENDPOINT: &str = "POST /api/maintenance-requests";

/// Password reset endpoint key
pub const PASSWORD_RESET_ENDPOINT: &str = "POST /api/auth/password-reset";

/// How long rate limit records are kept (24 hours). No window may be longer.
pub const RETENTION_SECS: u64 = 24 * 60 * 60;

/// Key a request is counted under, e.g. `POST /api/auth/login`
pub fn endpoint_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

/// Limit for one endpoint key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Maximum requests allowed in window
    pub max_requests: u32,

    /// Time window in seconds
    pub window_secs: u64,
}

impl RateLimitRule {
    /// Create a rule
    ///
    /// # Errors
    ///
    /// * `RateLimitError::InvalidRule` - Zero limit, zero window, or a window
    ///   longer than the record retention
    pub fn new(max_requests: u32, window_secs: u64) -> RateLimiterResult<Self> {
        let rule = Self {
            max_requests,
            window_secs,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Rule for the login endpoint
    pub fn login() -> Self {
        Self {
            max_requests: parse_env_nonzero_or("RATE_LIMIT_LOGIN_REQUESTS", 5),
            window_secs: parse_env_nonzero_or("RATE_LIMIT_LOGIN_WINDOW_SECS", 900),
        }
    }

    /// Rule for maintenance ticket creation
    pub fn ticket_creation() -> Self {
        Self {
            max_requests: parse_env_nonzero_or("RATE_LIMIT_TICKETS_REQUESTS", 20),
            window_secs: parse_env_nonzero_or("RATE_LIMIT_TICKETS_WINDOW_SECS", 3600),
        }
    }

    /// Rule for the password reset endpoint
    pub fn password_reset() -> Self {
        Self {
            max_requests: parse_env_nonzero_or("RATE_LIMIT_RESET_REQUESTS", 3),
            window_secs: parse_env_nonzero_or("RATE_LIMIT_RESET_WINDOW_SECS", 3600),
        }
    }

    /// Rule for every endpoint without an override
    pub fn default_rule() -> Self {
        Self {
            max_requests: parse_env_nonzero_or("RATE_LIMIT_DEFAULT_REQUESTS", 100),
            window_secs: parse_env_nonzero_or("RATE_LIMIT_DEFAULT_WINDOW_SECS", 3600),
        }
    }

    /// Check that the rule can be enforced
    pub fn validate(&self) -> RateLimiterResult<()> {
        if self.max_requests == 0 {
            return Err(RateLimitError::InvalidRule(
                "max_requests must be greater than 0".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(RateLimitError::InvalidRule(
                "window_secs must be greater than 0".to_string(),
            ));
        }
        // Older records are purged, so a longer window would undercount
        if self.window_secs > RETENTION_SECS {
            return Err(RateLimitError::InvalidRule(format!(
                "window_secs {} exceeds record retention of {RETENTION_SECS}s",
                self.window_secs
            )));
        }
        Ok(())
    }

    /// Window length
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs.min(RETENTION_SECS) as i64)
    }
}

/// Rate limit rules for all endpoints
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    default: RateLimitRule,
    overrides: HashMap<String, RateLimitRule>,
}

impl RateLimitConfig {
    /// Configuration with only a default rule
    pub fn new(default: RateLimitRule) -> RateLimiterResult<Self> {
        default.validate()?;
        Ok(Self {
            default,
            overrides: HashMap::new(),
        })
    }

    /// Built-in rules, each overridable through `RATE_LIMIT_*` variables
    pub fn from_env() -> RateLimiterResult<Self> {
        Self::new(RateLimitRule::default_rule())?
            .with_rule(LOGIN_ENDPOINT, RateLimitRule::login())?
            .with_rule(TICKET_CREATION_ENDPOINT, RateLimitRule::ticket_creation())?
            .with_rule(PASSWORD_RESET_ENDPOINT, RateLimitRule::password_reset())
    }

    /// Add or replace the rule for an endpoint key (`METHOD path`)
    pub fn with_rule(mut self, endpoint: &str, rule: RateLimitRule) -> RateLimiterResult<Self> {
        rule.validate()?;
        self.overrides.insert(endpoint.to_string(), rule);
        Ok(self)
    }

    /// Rule applying to an endpoint key
    pub fn rule_for(&self, endpoint: &str) -> RateLimitRule {
        self.overrides.get(endpoint).copied().unwrap_or(self.default)
    }

    /// Rule applying to endpoints without an override
    pub fn default_rule(&self) -> RateLimitRule {
        self.default
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let overrides = HashMap::from([
            (
                LOGIN_ENDPOINT.to_string(),
                RateLimitRule {
                    max_requests: 5,
                    window_secs: 900,
                },
            ),
            (
                TICKET_CREATION_ENDPOINT.to_string(),
                RateLimitRule {
                    max_requests: 20,
                    window_secs: 3600,
                },
            ),
            (
                PASSWORD_RESET_ENDPOINT.to_string(),
                RateLimitRule {
                    max_requests: 3,
                    window_secs: 3600,
                },
            ),
        ]);

        Self {
            default: RateLimitRule {
                max_requests: 100,
                window_secs: 3600,
            },
            overrides,
        }
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Requests left in the current window
    pub remaining: u32,

    /// When the oldest counted request leaves the window
    pub reset: DateTime<Utc>,

    /// Limit of the rule that applied
    pub limit: u32,
}

impl RateLimitDecision {
    /// Seconds until a denied request may be retried, rounded up
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.allowed {
            return None;
        }
        let millis = (self.reset - now).num_milliseconds().max(0) as u64;
        Some(millis.div_ceil(1000))
    }

    fn from_usage(rule: RateLimitRule, usage: WindowUsage, now: DateTime<Utc>) -> Self {
        let remaining = rule.max_requests.saturating_sub(usage.count);
        Self {
            allowed: remaining > 0,
            remaining,
            reset: usage.oldest.unwrap_or(now) + rule.window(),
            limit: rule.max_requests,
        }
    }
}

/// Rate limiter over a shared store
///
/// Holds no counters itself, so any number of instances can enforce the
/// same limits against one store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    ///
    /// * `store` - Store holding rate limit records
    /// * `config` - Rules per endpoint key
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create a rate limiter on a caller-supplied clock
    pub fn with_clock(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check the quota without recording anything
    ///
    /// # Arguments
    ///
    /// * `user_id` - Requesting user
    /// * `endpoint` - Request path, e.g. `/api/auth/login`
    /// * `method` - HTTP method
    pub async fn check_rate_limit(
        &self,
        user_id: UserId,
        endpoint: &str,
        method: &str,
    ) -> RateLimitDecision {
        let key = endpoint_key(method, endpoint);
        let rule = self.config.rule_for(&key);
        let now = self.clock.now();

        match self
            .store
            .window_usage(user_id, &key, now - rule.window())
            .await
        {
            Ok(usage) => RateLimitDecision::from_usage(rule, usage, now),
            Err(e) => self.fail_open(&key, &e, now),
        }
    }

    /// Record one request
    ///
    /// Together with [`check_rate_limit`](Self::check_rate_limit) this is
    /// not atomic: concurrent requests can all pass the check before any of
    /// them is recorded. Use [`with_rate_limit`](Self::with_rate_limit) for
    /// admission control.
    pub async fn record_request(
        &self,
        user_id: UserId,
        endpoint: &str,
        method: &str,
    ) -> RateLimiterResult<()> {
        let key = endpoint_key(method, endpoint);
        self.store
            .append_request(user_id, &key, self.clock.now())
            .await?;
        Ok(())
    }

    /// Atomically check the quota and record the request if it fits
    ///
    /// This is the admission control entry point. Count and append happen
    /// in one store operation, so concurrent requests never overshoot the
    /// limit. `remaining` already accounts for this request.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use rentwise_auth::security::RateLimiter;
    /// # async fn example(limiter: &RateLimiter, user_id: uuid::Uuid) {
    /// let decision = limiter
    ///     .with_rate_limit(user_id, "/api/maintenance-requests", "POST")
    ///     .await;
    /// if !decision.allowed {
    ///     println!("Too many requests, retry after {}", decision.reset);
    /// }
    /// # }
    /// ```
    pub async fn with_rate_limit(
        &self,
        user_id: UserId,
        endpoint: &str,
        method: &str,
    ) -> RateLimitDecision {
        let key = endpoint_key(method, endpoint);
        let rule = self.config.rule_for(&key);
        let now = self.clock.now();

        let admission = match self
            .store
            .admit(user_id, &key, now - rule.window(), now, rule.max_requests)
            .await
        {
            Ok(admission) => admission,
            Err(e) => return self.fail_open(&key, &e, now),
        };

        let mut decision = RateLimitDecision::from_usage(rule, admission.usage, now);
        decision.allowed = admission.admitted;
        if !admission.admitted {
            log::debug!("Rate limited user {} on {}", user_id, key);
        }
        decision
    }

    /// Delete records older than the retention period (24 hours)
    pub async fn cleanup_rate_limits(&self) -> RateLimiterResult<u64> {
        let cutoff = self.clock.now() - Duration::seconds(RETENTION_SECS as i64);
        let removed = self.store.delete_before(cutoff).await?;
        log::info!("Removed {} rate limit record(s)", removed);
        Ok(removed)
    }

    fn fail_open(
        &self,
        key: &str,
        error: &crate::db::StoreError,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        log::warn!(
            "Rate limit store unavailable for {}, admitting request: {}",
            key,
            error
        );

        let default = self.config.default_rule();
        RateLimitDecision {
            allowed: true,
            remaining: default.max_requests,
            reset: now + default.window(),
            limit: default.max_requests,
        }
    }
}
