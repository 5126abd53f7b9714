//! Security module providing per-endpoint rate limiting.
//!
//! Requests are counted per user and `METHOD path` key in a sliding window.
//! Each key has its own limit, with a default for everything else:
//! - **Login**: 5 requests per 15 minutes
//! - **Maintenance ticket creation**: 20 requests per hour
//! - **Password reset**: 3 requests per hour
//! - **Everything else**: 100 requests per hour
//!
//! The limiter fails open: when its store is unreachable, requests are
//! admitted with the full default quota and a warning is logged.
//!
//! ## Example
//!
//! ```no_run
//! use rentwise_auth::db::{Database, DatabaseConfig};
//! use rentwise_auth::security::{RateLimitConfig, RateLimiter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()).await?;
//!     let limiter = RateLimiter::new(
//!         Arc::new(db.rate_limit_store()),
//!         RateLimitConfig::from_env()?,
//!     );
//!
//!     let user_id = uuid::Uuid::new_v4();
//!     let decision = limiter
//!         .with_rate_limit(user_id, "/api/auth/login", "POST")
//!         .await;
//!
//!     if decision.allowed {
//!         println!("Login allowed, {} attempts remaining", decision.remaining);
//!     } else {
//!         println!("Rate limited until {}", decision.reset);
//!     }
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod rate_limiter;

pub use errors::{RateLimitError, RateLimiterResult};
pub use rate_limiter::{
    LOGIN_ENDPOINT, PASSWORD_RESET_ENDPOINT, RateLimitConfig, RateLimitDecision, RateLimitRule,
    RateLimiter, TICKET_CREATION_ENDPOINT, endpoint_key,
};
