//! # Rentwise Auth
//!
//! Authentication and session security layer for the Rentwise property
//! management platform.
//!
//! Every request handled by the platform passes through three components,
//! leaves first:
//!
//! - **Credential Verifier** ([`auth::password`]): Argon2id password hashing,
//!   constant-time verification and password strength policy
//! - **Session Manager** ([`auth::session`]): opaque session and refresh
//!   tokens, expiry, refresh token rotation and session pinning
//! - **Rate Limiter** ([`security::rate_limiter`]): sliding window admission
//!   control per user and `METHOD path`
//!
//! [`auth::AuthManager`] ties the credential verifier to the session manager
//! for the login, password change and password reset flows.
//!
//! All state lives behind the store traits in [`db`]. A PostgreSQL
//! implementation is used in production and an in-memory one in tests, and
//! both are injected at construction so any number of processes can share the
//! same backing store.
//!
//! ## Example
//!
//! ```
//! use rentwise_auth::auth::{SessionConfig, SessionManager};
//! use rentwise_auth::db::MemoryStore;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), rentwise_auth::auth::AuthError> {
//! let store = Arc::new(MemoryStore::new());
//! let user_id = Uuid::new_v4();
//! store.set_role(user_id, rentwise_auth::auth::Role::Tenant);
//!
//! let sessions = SessionManager::new(store, SessionConfig::default());
//! let issued = sessions.create_session(user_id, "Mozilla/5.0", "203.0.113.7").await?;
//!
//! let identity = sessions
//!     .validate_session(&issued.token, "Mozilla/5.0", "203.0.113.7")
//!     .await?;
//! assert_eq!(identity.user_id, user_id);
//! # Ok(())
//! # }
//! ```

/// Password hashing, sessions and the login facade.
pub mod auth;

/// Time source shared by sessions and rate limiting.
pub mod clock;

/// Environment-driven configuration helpers.
pub mod config;

/// Store traits and their PostgreSQL and in-memory implementations.
pub mod db;

/// Per-endpoint rate limiting.
pub mod security;

pub use auth::{AuthError, AuthManager, AuthResult, CredentialVerifier, SessionManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use security::{RateLimitConfig, RateLimitDecision, RateLimiter};
