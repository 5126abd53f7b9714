//! Error types for security module

use crate::db::StoreError;
use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimiterResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Rule that cannot be enforced
    #[error("Invalid rate limit rule: {0}")]
    InvalidRule(String),
}

impl RateLimitError {
    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        "Internal server error".to_string()
    }
}
