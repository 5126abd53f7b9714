//! Authentication manager implementation.

use super::{
    errors::{AuthFailure, AuthResult, SystemError},
    models::{IssuedSession, PasswordHash, PasswordResetTicket, SessionId, UserId},
    password::{CredentialVerifier, validate_password_strength},
    session::{SessionConfig, SessionManager},
    tokens::{generate_token, hash_token},
};
use crate::db::{CredentialStore, SessionStore};
use chrono::Duration;
use std::sync::Arc;

/// Authentication manager
///
/// Runs the login, password change and password reset flows on top of the
/// credential verifier and the session manager. Key derivation is moved off
/// the async runtime onto the blocking pool.
#[derive(Clone)]
pub struct AuthManager {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionManager,
    verifier: Arc<CredentialVerifier>,
    reset_token_ttl: Duration,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// # Arguments
    ///
    /// * `credentials` - Store holding password hashes and reset tokens
    /// * `sessions` - Store holding sessions and user roles
    /// * `verifier` - Password hashing configuration
    /// * `session_config` - Session lifetimes and pinning policy
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        verifier: CredentialVerifier,
        session_config: SessionConfig,
    ) -> Self {
        Self::with_session_manager(
            credentials,
            SessionManager::new(sessions, session_config),
            verifier,
        )
    }

    /// Create an authentication manager around an existing session manager
    pub fn with_session_manager(
        credentials: Arc<dyn CredentialStore>,
        sessions: SessionManager,
        verifier: CredentialVerifier,
    ) -> Self {
        Self {
            credentials,
            sessions,
            verifier: Arc::new(verifier),
            reset_token_ttl: Duration::hours(1), // 1 hour
        }
    }

    /// Override how long a password reset token stays usable
    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }

    /// Session manager used by this instance
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Set a user's password, e.g. at account creation
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Password too weak
    pub async fn set_password(&self, user_id: UserId, password: &str) -> AuthResult<()> {
        validate_password_strength(password)?;

        let hashed = self.hash(password).await?;
        self.credentials
            .upsert_password(user_id, &hashed, self.sessions.clock().now())
            .await?;

        log::info!("Password set for user {}", user_id);
        Ok(())
    }

    /// Login a user
    ///
    /// # Arguments
    ///
    /// * `user_id` - User resolved from the login identifier
    /// * `password` - Password as typed
    /// * `user_agent` - Client user agent, pinned to the new session
    /// * `ip_address` - Client address, pinned to the new session
    ///
    /// # Errors
    ///
    /// * `AuthFailure::InvalidCredentials` - Unknown user or wrong password.
    ///   Both paths run a full key derivation, so timing does not tell them
    ///   apart. Also returned when the password is replaced while the login
    ///   upgrades its hash cost.
    pub async fn login(
        &self,
        user_id: UserId,
        password: &str,
        user_agent: &str,
        ip_address: &str,
    ) -> AuthResult<IssuedSession> {
        let Some(record) = self.credentials.find_credentials(user_id).await? else {
            self.hash(password).await?;
            log::warn!("Login attempt for user {} without credentials", user_id);
            return Err(AuthFailure::InvalidCredentials.into());
        };

        if !self.verify(password, &record.password).await? {
            log::warn!("Failed login for user {}", user_id);
            return Err(AuthFailure::InvalidCredentials.into());
        }

        if self.verifier.needs_rehash(&record.password) {
            let upgraded = self.hash(password).await?;
            if !self
                .credentials
                .upgrade_password(user_id, &record.password, &upgraded)
                .await?
            {
                log::warn!("Password of user {} changed during login, rejecting", user_id);
                return Err(AuthFailure::InvalidCredentials.into());
            }
            log::info!("Upgraded password hash cost for user {}", user_id);
        }

        let issued = self
            .sessions
            .create_session(user_id, user_agent, ip_address)
            .await?;

        log::info!("User {} signed in, session {}", user_id, issued.session.id);
        Ok(issued)
    }

    /// Change a password after checking the current one
    ///
    /// Every session of the user is revoked, including the one making the
    /// request.
    ///
    /// # Errors
    ///
    /// * `AuthFailure::InvalidCredentials` - Current password wrong
    /// * `AuthError::Validation` - New password too weak
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let record = self
            .credentials
            .find_credentials(user_id)
            .await?
            .ok_or(AuthFailure::InvalidCredentials)?;

        if !self.verify(current_password, &record.password).await? {
            log::warn!("Password change for user {} with wrong current password", user_id);
            return Err(AuthFailure::InvalidCredentials.into());
        }

        validate_password_strength(new_password)?;

        let hashed = self.hash(new_password).await?;
        self.credentials
            .upsert_password(user_id, &hashed, self.sessions.clock().now())
            .await?;
        self.revoke_after_password_change(user_id).await
    }

    /// Issue a password reset token
    ///
    /// Returns `None` when the user has no credentials. Callers should answer
    /// the same way in both cases so the endpoint can't be used to probe for
    /// accounts. A new request replaces any outstanding token.
    pub async fn request_password_reset(
        &self,
        user_id: UserId,
    ) -> AuthResult<Option<PasswordResetTicket>> {
        let token = generate_token();
        let expires_at = self.sessions.clock().now() + self.reset_token_ttl;

        if !self
            .credentials
            .set_reset_token(user_id, &hash_token(&token), expires_at)
            .await?
        {
            log::debug!("Password reset requested for user {} without credentials", user_id);
            return Ok(None);
        }

        log::info!("Password reset token issued for user {}", user_id);
        Ok(Some(PasswordResetTicket {
            user_id,
            token,
            expires_at,
        }))
    }

    /// Consume a reset token and set a new password
    ///
    /// The token is cleared by the same write that stores the new password,
    /// so it works once even under concurrent requests. A password rejected
    /// as too weak leaves the token usable. Every session of the user is
    /// revoked.
    ///
    /// # Errors
    ///
    /// * `AuthFailure::InvalidResetToken` - Unknown, used or expired token
    /// * `AuthError::Validation` - New password too weak
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<UserId> {
        let token_hash = hash_token(token);
        let record = self
            .credentials
            .find_by_reset_token(&token_hash)
            .await?
            .ok_or(AuthFailure::InvalidResetToken)?;

        let now = self.sessions.clock().now();
        if record.reset_token_expires_at.is_none_or(|expires| now > expires) {
            return Err(AuthFailure::InvalidResetToken.into());
        }

        validate_password_strength(new_password)?;

        let hashed = self.hash(new_password).await?;
        let Some(user_id) = self
            .credentials
            .reset_password_with_token(&token_hash, &hashed, now)
            .await?
        else {
            log::warn!(
                "Reset token of user {} was consumed concurrently, rejecting",
                record.user_id
            );
            return Err(AuthFailure::InvalidResetToken.into());
        };

        self.revoke_after_password_change(user_id).await?;
        Ok(user_id)
    }

    /// Sign out of one session
    pub async fn sign_out(&self, session_id: SessionId) -> AuthResult<bool> {
        self.sessions.invalidate_session(session_id).await
    }

    async fn revoke_after_password_change(&self, user_id: UserId) -> AuthResult<()> {
        let revoked = self.sessions.invalidate_all_user_sessions(user_id).await?;
        log::info!(
            "Password changed for user {}, revoked {} session(s)",
            user_id,
            revoked
        );
        Ok(())
    }

    async fn hash(&self, password: &str) -> AuthResult<PasswordHash> {
        let verifier = Arc::clone(&self.verifier);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || verifier.hash_password(&password))
            .await
            .map_err(|e| SystemError::Task(e.to_string()))?
    }

    async fn verify(&self, password: &str, stored: &PasswordHash) -> AuthResult<bool> {
        let verifier = Arc::clone(&self.verifier);
        let password = password.to_string();
        let stored = stored.clone();
        tokio::task::spawn_blocking(move || verifier.verify_password(&password, &stored))
            .await
            .map_err(|e| SystemError::Task(e.to_string()))?
    }
}
