//! Authentication error types.

use crate::db::StoreError;
use std::fmt;
use thiserror::Error;

/// Password strength rule that a candidate password failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    TooShort { min_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecial,
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordRule::TooShort { min_length } => {
                write!(f, "must be at least {min_length} characters long")
            }
            PasswordRule::MissingUppercase => f.write_str("must contain an uppercase letter"),
            PasswordRule::MissingLowercase => f.write_str("must contain a lowercase letter"),
            PasswordRule::MissingDigit => f.write_str("must contain a digit"),
            PasswordRule::MissingSpecial => f.write_str("must contain a special character"),
        }
    }
}

/// Every password rule a candidate failed, in a stable order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<PasswordRule>,
}

impl ValidationError {
    /// Whether `rule` is among the violations
    pub fn contains(&self, rule: PasswordRule) -> bool {
        self.violations.contains(&rule)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password ")?;
        for (i, rule) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Reason an authentication attempt was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// Unknown user or wrong password. Deliberately not told apart.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// No session matches the presented token
    #[error("Invalid session")]
    InvalidSession,

    /// Session token lapsed
    #[error("Session expired")]
    SessionExpired,

    /// Token presented from a different client context than it was issued to
    #[error("Session compromised")]
    SessionCompromised,

    /// No session matches the presented refresh token
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Refresh token lapsed
    #[error("Refresh token expired")]
    RefreshTokenExpired,

    /// Reset token unknown, used or lapsed
    #[error("Invalid or expired reset token")]
    InvalidResetToken,
}

/// Infrastructure failures
#[derive(Debug, Error)]
pub enum SystemError {
    /// Backing store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key derivation failed
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    /// Stored credential cannot be used for verification
    #[error("Malformed credential record: {0}")]
    MalformedCredential(String),

    /// Blocking hashing task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Password policy violations, all of them
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Credentials or session rejected
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthFailure),

    /// Store or hashing failure
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Coarse error category for status code mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    System,
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::System(SystemError::Store(err))
    }
}

impl AuthError {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Authentication(_) => ErrorKind::Authentication,
            AuthError::System(_) => ErrorKind::System,
        }
    }

    /// Authentication failure, if this is one
    pub fn failure(&self) -> Option<AuthFailure> {
        match self {
            AuthError::Authentication(failure) => Some(*failure),
            _ => None,
        }
    }

    /// Whether the session was invalidated because of a pinning violation
    pub fn is_compromised(&self) -> bool {
        self.failure() == Some(AuthFailure::SessionCompromised)
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// System errors are sanitized so store details never reach the client,
    /// and token failures are collapsed so callers can't probe which tokens
    /// or users exist.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Validation(err) => err.to_string(),
            AuthError::Authentication(AuthFailure::SessionExpired)
            | AuthError::Authentication(AuthFailure::RefreshTokenExpired) => {
                "Session expired, please sign in again".to_string()
            }
            AuthError::Authentication(AuthFailure::SessionCompromised) => {
                "Session invalidated, please sign in again".to_string()
            }
            AuthError::Authentication(_) => "Authentication failed".to_string(),
            AuthError::System(_) => "Internal server error".to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validation_message_lists_every_rule() {
        let err = ValidationError {
            violations: vec![
                PasswordRule::TooShort { min_length: 12 },
                PasswordRule::MissingDigit,
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("at least 12 characters"));
        assert!(msg.contains("digit"));
    }

    #[test]
    fn test_client_message_hides_store_details() {
        let err = AuthError::from(StoreError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::System);
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_client_message_collapses_token_failures() {
        for failure in [
            AuthFailure::InvalidCredentials,
            AuthFailure::InvalidSession,
            AuthFailure::InvalidRefreshToken,
            AuthFailure::InvalidResetToken,
        ] {
            assert_eq!(
                AuthError::from(failure).client_message(),
                "Authentication failed"
            );
        }
    }

    #[test]
    fn test_compromised_is_distinct() {
        let err = AuthError::from(AuthFailure::SessionCompromised);
        assert!(err.is_compromised());
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!AuthError::from(AuthFailure::SessionExpired).is_compromised());
    }
}
