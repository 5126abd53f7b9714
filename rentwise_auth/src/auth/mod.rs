//! Authentication module providing password verification, session management
//! and the login flows built on them.
//!
//! This module implements:
//! - Argon2id password hashing with an optional server-side pepper
//! - Opaque session tokens (24-hour expiry) stored only as SHA-256 hashes
//! - Rotating refresh tokens (30-day expiry)
//! - Session pinning to the issuing user agent and network
//! - Single-use password reset tokens
//!
//! ## Example
//!
//! ```no_run
//! use rentwise_auth::auth::{AuthManager, CredentialVerifier, PasswordConfig, SessionConfig};
//! use rentwise_auth::db::{Database, DatabaseConfig};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()).await?;
//!     let auth = AuthManager::new(
//!         Arc::new(db.credential_store()),
//!         Arc::new(db.session_store()),
//!         CredentialVerifier::new(PasswordConfig::from_env()?),
//!         SessionConfig::from_env()?,
//!     );
//!
//!     let user_id = Uuid::parse_str("7d3c0f5e-5a8b-4c39-9a53-2f4f0f7d8a11")?;
//!     let issued = auth
//!         .login(user_id, "Maple-Street-221b", "Mozilla/5.0", "203.0.113.7")
//!         .await?;
//!     println!("Signed in, session {}", issued.session.id);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod password;
pub mod session;
pub mod tokens;

pub use errors::{
    AuthError, AuthFailure, AuthResult, ErrorKind, PasswordRule, SystemError, ValidationError,
};
pub use manager::AuthManager;
pub use models::{
    CredentialRecord, IssuedSession, PasswordHash, PasswordResetTicket, Role, Session, SessionId,
    SessionIdentity, UserId,
};
pub use password::{CredentialVerifier, PasswordConfig, validate_password_strength};
pub use session::{PinningPolicy, SessionConfig, SessionManager};
