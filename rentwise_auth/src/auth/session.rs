//! Session issuance, validation, rotation and revocation.
//!
//! A session moves from Active to Expired (noticed lazily on validation) or
//! Invalidated (sign-out, pinning violation, rotation). Both terminal states
//! delete the record, so a session never comes back.

use super::errors::{AuthFailure, AuthResult};
use super::models::{IssuedSession, Role, Session, SessionId, SessionIdentity, UserId};
use super::tokens::{generate_token, hash_token};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, parse_env_nonzero_or};
use crate::db::SessionStore;
use chrono::Duration;
use std::{net::IpAddr, str::FromStr, sync::Arc};
use uuid::Uuid;

/// Default session lifetime (24 hours)
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Default refresh token lifetime (30 days)
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Longest accepted refresh token lifetime (1 year)
pub const MAX_REFRESH_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// How strictly a session is bound to the client context it was issued to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinningPolicy {
    /// User agent and IP address must match exactly
    Strict,
    /// User agent must match exactly, IP address must stay in the same
    /// IPv4 /24 or IPv6 /48
    #[default]
    UserAgentAndSubnet,
    /// Only the user agent must match
    UserAgentOnly,
}

impl PinningPolicy {
    /// Whether a request from `user_agent` / `ip_address` may use `session`
    pub fn matches(&self, session: &Session, user_agent: &str, ip_address: &str) -> bool {
        if session.user_agent != user_agent {
            return false;
        }
        match self {
            PinningPolicy::Strict => session.ip_address == ip_address,
            PinningPolicy::UserAgentAndSubnet => same_subnet(&session.ip_address, ip_address),
            PinningPolicy::UserAgentOnly => true,
        }
    }
}

impl FromStr for PinningPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(PinningPolicy::Strict),
            "subnet" => Ok(PinningPolicy::UserAgentAndSubnet),
            "user_agent" => Ok(PinningPolicy::UserAgentOnly),
            other => Err(ConfigError::Invalid {
                var: "SESSION_PINNING".to_string(),
                reason: format!("unknown policy '{other}', expected strict, subnet or user_agent"),
            }),
        }
    }
}

/// Addresses that don't parse only match themselves
fn same_subnet(stored: &str, presented: &str) -> bool {
    let (Ok(a), Ok(b)) = (stored.parse::<IpAddr>(), presented.parse::<IpAddr>()) else {
        return stored == presented;
    };

    match (a.to_canonical(), b.to_canonical()) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets()[..3] == b.octets()[..3],
        (IpAddr::V6(a), IpAddr::V6(b)) => a.segments()[..3] == b.segments()[..3],
        _ => false,
    }
}

fn seconds_from_env(var: &str, default: i64) -> Result<Duration, ConfigError> {
    Duration::try_seconds(parse_env_nonzero_or(var, default)).ok_or_else(|| ConfigError::Invalid {
        var: var.to_string(),
        reason: "Out of range".to_string(),
    })
}

/// Session lifetimes and pinning policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    session_ttl: Duration,
    refresh_ttl: Duration,
    pinning: PinningPolicy,
}

impl SessionConfig {
    /// Create a configuration
    ///
    /// # Errors
    ///
    /// * `ConfigError::Invalid` - A lifetime is not positive or exceeds one
    ///   year, or the session would outlive its refresh token
    pub fn new(
        session_ttl: Duration,
        refresh_ttl: Duration,
        pinning: PinningPolicy,
    ) -> Result<Self, ConfigError> {
        if session_ttl <= Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "SESSION_TTL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        if refresh_ttl > Duration::seconds(MAX_REFRESH_TTL_SECS) {
            return Err(ConfigError::Invalid {
                var: "SESSION_REFRESH_TTL_SECS".to_string(),
                reason: format!("Must not exceed {MAX_REFRESH_TTL_SECS}s"),
            });
        }
        if refresh_ttl <= session_ttl {
            return Err(ConfigError::Invalid {
                var: "SESSION_REFRESH_TTL_SECS".to_string(),
                reason: format!(
                    "Must be greater than the session lifetime ({}s)",
                    session_ttl.num_seconds()
                ),
            });
        }

        Ok(Self {
            session_ttl,
            refresh_ttl,
            pinning,
        })
    }

    /// Load from `SESSION_TTL_SECS`, `SESSION_REFRESH_TTL_SECS` and
    /// `SESSION_PINNING` (`strict`, `subnet` or `user_agent`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let pinning = match std::env::var("SESSION_PINNING") {
            Ok(value) => value.parse()?,
            Err(_) => PinningPolicy::default(),
        };

        Self::new(
            seconds_from_env("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            seconds_from_env("SESSION_REFRESH_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?,
            pinning,
        )
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn pinning(&self) -> PinningPolicy {
        self.pinning
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            pinning: PinningPolicy::default(),
        }
    }
}

/// Session manager
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a session manager on the wall clock
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create a session manager on a caller-supplied clock
    pub fn with_clock(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new session
    ///
    /// # Returns
    ///
    /// * `AuthResult<IssuedSession>` - The stored session plus the raw token
    ///   and refresh token. This is the only time the raw values are available.
    pub async fn create_session(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
    ) -> AuthResult<IssuedSession> {
        let issued = self.issue(user_id, user_agent, ip_address);
        self.store.insert_session(&issued.session).await?;

        log::debug!("Issued session {} for user {}", issued.session.id, user_id);
        Ok(issued)
    }

    /// Validate a session token
    ///
    /// # Errors
    ///
    /// * `AuthFailure::InvalidSession` - No session holds this token
    /// * `AuthFailure::SessionExpired` - Token lapsed; the session is deleted
    /// * `AuthFailure::SessionCompromised` - Client context drifted; the
    ///   session is deleted
    pub async fn validate_session(
        &self,
        token: &str,
        user_agent: &str,
        ip_address: &str,
    ) -> AuthResult<SessionIdentity> {
        let session = self
            .store
            .find_by_token_hash(&hash_token(token))
            .await?
            .ok_or(AuthFailure::InvalidSession)?;

        if session.is_expired_at(self.clock.now()) {
            self.store.delete_session(session.id).await?;
            return Err(AuthFailure::SessionExpired.into());
        }

        self.enforce_pinning(&session, user_agent, ip_address).await?;

        let role = self.require_user(&session, AuthFailure::InvalidSession).await?;

        Ok(SessionIdentity {
            session_id: session.id,
            user_id: session.user_id,
            role,
        })
    }

    /// Exchange a refresh token for a new session
    ///
    /// The old session is replaced in the same store operation, so its refresh
    /// token never validates again.
    ///
    /// # Errors
    ///
    /// * `AuthFailure::InvalidRefreshToken` - Unknown token, already rotated
    ///   by a concurrent request, or its user no longer exists
    /// * `AuthFailure::RefreshTokenExpired` - Token lapsed; the session is deleted
    /// * `AuthFailure::SessionCompromised` - Client context drifted; the
    ///   session is deleted
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        user_agent: &str,
        ip_address: &str,
    ) -> AuthResult<IssuedSession> {
        let session = self
            .store
            .find_by_refresh_token_hash(&hash_token(refresh_token))
            .await?
            .ok_or(AuthFailure::InvalidRefreshToken)?;

        if session.is_refresh_expired_at(self.clock.now()) {
            self.store.delete_session(session.id).await?;
            return Err(AuthFailure::RefreshTokenExpired.into());
        }

        self.enforce_pinning(&session, user_agent, ip_address).await?;
        self.require_user(&session, AuthFailure::InvalidRefreshToken).await?;

        let rotated = self.issue(session.user_id, user_agent, ip_address);
        if !self.store.rotate_session(session.id, &rotated.session).await? {
            log::warn!(
                "Refresh token for session {} was used concurrently, rejecting",
                session.id
            );
            return Err(AuthFailure::InvalidRefreshToken.into());
        }

        log::debug!(
            "Rotated session {} into {} for user {}",
            session.id,
            rotated.session.id,
            session.user_id
        );
        Ok(rotated)
    }

    /// Revoke one session
    ///
    /// Returns whether the session existed.
    pub async fn invalidate_session(&self, session_id: SessionId) -> AuthResult<bool> {
        Ok(self.store.delete_session(session_id).await?)
    }

    /// Revoke every session of a user
    ///
    /// Returns the number of sessions removed.
    pub async fn invalidate_all_user_sessions(&self, user_id: UserId) -> AuthResult<u64> {
        let removed = self.store.delete_user_sessions(user_id).await?;
        log::info!("Invalidated {} session(s) for user {}", removed, user_id);
        Ok(removed)
    }

    /// Sessions of a user that have not expired, newest first
    pub async fn get_active_sessions(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        Ok(self
            .store
            .list_active_sessions(user_id, self.clock.now())
            .await?)
    }

    /// Delete sessions whose refresh token has lapsed
    pub async fn cleanup_expired_sessions(&self) -> AuthResult<u64> {
        let removed = self.store.delete_expired_sessions(self.clock.now()).await?;
        log::info!("Removed {} expired session(s)", removed);
        Ok(removed)
    }

    async fn enforce_pinning(
        &self,
        session: &Session,
        user_agent: &str,
        ip_address: &str,
    ) -> AuthResult<()> {
        if self.config.pinning.matches(session, user_agent, ip_address) {
            return Ok(());
        }

        log::warn!(
            "SECURITY: session {} of user {} presented from a different client \
             (ip {} -> {}), invalidating",
            session.id,
            session.user_id,
            session.ip_address,
            ip_address
        );
        self.store.delete_session(session.id).await?;
        Err(AuthFailure::SessionCompromised.into())
    }

    /// Role of the session owner, deleting the session when the user is gone
    async fn require_user(&self, session: &Session, missing: AuthFailure) -> AuthResult<Role> {
        if let Some(role) = self.store.find_user_role(session.user_id).await? {
            return Ok(role);
        }

        log::warn!(
            "Session {} belongs to missing user {}, invalidating",
            session.id,
            session.user_id
        );
        self.store.delete_session(session.id).await?;
        Err(missing.into())
    }

    fn issue(&self, user_id: UserId, user_agent: &str, ip_address: &str) -> IssuedSession {
        let now = self.clock.now();
        let token = generate_token();
        let refresh_token = generate_token();

        IssuedSession {
            session: Session {
                id: Uuid::new_v4(),
                user_id,
                token_hash: hash_token(&token),
                refresh_token_hash: hash_token(&refresh_token),
                expires_at: now + self.config.session_ttl,
                refresh_expires_at: now + self.config.refresh_ttl,
                user_agent: user_agent.to_string(),
                ip_address: ip_address.to_string(),
                created_at: now,
            },
            token,
            refresh_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, Role};
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64)";
    const IP: &str = "203.0.113.10";

    fn setup(pinning: PinningPolicy) -> (SessionManager, Arc<MemoryStore>, Arc<ManualClock>, UserId) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let user_id = Uuid::new_v4();
        store.set_role(user_id, Role::Landlord);

        let config = SessionConfig::new(
            Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            pinning,
        )
        .unwrap();
        let manager = SessionManager::with_clock(store.clone(), clock.clone(), config);
        (manager, store, clock, user_id)
    }

    fn failure(err: AuthError) -> AuthFailure {
        err.failure().expect("expected an authentication failure")
    }

    #[tokio::test]
    async fn test_create_then_validate() {
        let (manager, _, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        assert!(issued.session.expires_at < issued.session.refresh_expires_at);
        assert_ne!(issued.session.token_hash, issued.token);

        let identity = manager.validate_session(&issued.token, UA, IP).await.unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.role, Role::Landlord);
        assert_eq!(identity.session_id, issued.session.id);
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let (manager, _, _, _) = setup(PinningPolicy::Strict);
        let err = manager
            .validate_session(&generate_token(), UA, IP)
            .await
            .unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidSession);
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted() {
        let (manager, store, clock, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        clock.advance(Duration::hours(24) + Duration::seconds(1));

        let err = manager.validate_session(&issued.token, UA, IP).await.unwrap_err();
        assert_eq!(failure(err), AuthFailure::SessionExpired);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_user_agent_drift_invalidates_session() {
        let (manager, _, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        let err = manager
            .validate_session(&issued.token, "curl/8.5.0", IP)
            .await
            .unwrap_err();
        assert!(err.is_compromised());

        let err = manager.validate_session(&issued.token, UA, IP).await.unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidSession);
    }

    #[tokio::test]
    async fn test_subnet_policy_tolerates_roaming_within_subnet() {
        let (manager, _, _, user_id) = setup(PinningPolicy::UserAgentAndSubnet);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        assert!(
            manager
                .validate_session(&issued.token, UA, "203.0.113.77")
                .await
                .is_ok()
        );

        let err = manager
            .validate_session(&issued.token, UA, "198.51.100.10")
            .await
            .unwrap_err();
        assert!(err.is_compromised());
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_any_ip_change() {
        let (manager, _, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        let err = manager
            .validate_session(&issued.token, UA, "203.0.113.11")
            .await
            .unwrap_err();
        assert!(err.is_compromised());
    }

    #[tokio::test]
    async fn test_user_agent_only_policy_ignores_ip() {
        let (manager, _, _, user_id) = setup(PinningPolicy::UserAgentOnly);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        assert!(
            manager
                .validate_session(&issued.token, UA, "192.0.2.200")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let (manager, store, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        let rotated = manager
            .refresh_session(&issued.refresh_token, UA, IP)
            .await
            .unwrap();
        assert_ne!(rotated.session.id, issued.session.id);
        assert_ne!(rotated.refresh_token, issued.refresh_token);
        assert_eq!(store.session_count(), 1);

        let err = manager
            .refresh_session(&issued.refresh_token, UA, IP)
            .await
            .unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidRefreshToken);

        let err = manager.validate_session(&issued.token, UA, IP).await.unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidSession);

        assert!(manager.validate_session(&rotated.token, UA, IP).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_after_access_expiry_but_before_refresh_expiry() {
        let (manager, _, clock, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        clock.advance(Duration::days(2));
        assert!(
            manager
                .refresh_session(&issued.refresh_token, UA, IP)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_rejected() {
        let (manager, store, clock, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        clock.advance(Duration::days(31));
        let err = manager
            .refresh_session(&issued.refresh_token, UA, IP)
            .await
            .unwrap_err();
        assert_eq!(failure(err), AuthFailure::RefreshTokenExpired);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_from_other_client_is_compromised() {
        let (manager, store, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();

        let err = manager
            .refresh_session(&issued.refresh_token, "python-requests/2.31", IP)
            .await
            .unwrap_err();
        assert!(err.is_compromised());
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_list() {
        let (manager, _, clock, user_id) = setup(PinningPolicy::Strict);
        let first = manager.create_session(user_id, UA, IP).await.unwrap();
        clock.advance(Duration::minutes(1));
        let second = manager.create_session(user_id, UA, IP).await.unwrap();

        let active = manager.get_active_sessions(user_id).await.unwrap();
        assert_eq!(
            active.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![second.session.id, first.session.id]
        );

        assert!(manager.invalidate_session(first.session.id).await.unwrap());
        assert!(!manager.invalidate_session(first.session.id).await.unwrap());
        assert_eq!(manager.invalidate_all_user_sessions(user_id).await.unwrap(), 1);
        assert!(manager.get_active_sessions(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_sessions_exclude_expired() {
        let (manager, _, clock, user_id) = setup(PinningPolicy::Strict);
        manager.create_session(user_id, UA, IP).await.unwrap();
        clock.advance(Duration::hours(25));
        let fresh = manager.create_session(user_id, UA, IP).await.unwrap();

        let active = manager.get_active_sessions(user_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh.session.id);
    }

    #[tokio::test]
    async fn test_cleanup_removes_sessions_past_refresh_expiry() {
        let (manager, store, clock, user_id) = setup(PinningPolicy::Strict);
        manager.create_session(user_id, UA, IP).await.unwrap();
        clock.advance(Duration::days(29));
        manager.create_session(user_id, UA, IP).await.unwrap();
        clock.advance(Duration::days(2));

        assert_eq!(manager.cleanup_expired_sessions().await.unwrap(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_user_invalidates_session() {
        let (manager, store, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();
        store.remove_user(user_id);

        let err = manager.validate_session(&issued.token, UA, IP).await.unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidSession);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_user_cannot_refresh() {
        let (manager, store, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();
        store.remove_user(user_id);

        let err = manager
            .refresh_session(&issued.refresh_token, UA, IP)
            .await
            .unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidRefreshToken);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let (manager, store, _, user_id) = setup(PinningPolicy::Strict);
        let issued = manager.create_session(user_id, UA, IP).await.unwrap();
        store.set_unavailable(true);

        let err = manager.validate_session(&issued.token, UA, IP).await.unwrap_err();
        assert!(matches!(err, AuthError::System(_)));
    }

    #[test]
    fn test_config_rejects_session_outliving_refresh() {
        let err = SessionConfig::new(
            Duration::days(2),
            Duration::days(1),
            PinningPolicy::Strict,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        assert!(
            SessionConfig::new(Duration::days(1), Duration::days(400), PinningPolicy::Strict)
                .is_err()
        );
    }

    #[test]
    fn test_pinning_policy_parses() {
        assert_eq!("strict".parse::<PinningPolicy>().unwrap(), PinningPolicy::Strict);
        assert_eq!(
            "SUBNET".parse::<PinningPolicy>().unwrap(),
            PinningPolicy::UserAgentAndSubnet
        );
        assert!("loose".parse::<PinningPolicy>().is_err());
    }

    #[test]
    fn test_same_subnet() {
        assert!(same_subnet("10.1.2.3", "10.1.2.250"));
        assert!(!same_subnet("10.1.2.3", "10.1.3.3"));
        assert!(same_subnet("2001:db8:abcd:1::1", "2001:db8:abcd:ffff::2"));
        assert!(!same_subnet("2001:db8:abcd::1", "2001:db8:abce::1"));
        assert!(same_subnet("::ffff:192.0.2.1", "192.0.2.99"));
        assert!(!same_subnet("10.0.0.1", "2001:db8::1"));
        assert!(same_subnet("unknown", "unknown"));
        assert!(!same_subnet("unknown", "10.0.0.1"));
    }
}
