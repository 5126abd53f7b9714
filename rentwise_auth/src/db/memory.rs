//! In-memory store for tests, local development and simulations.
//!
//! Implements every store trait behind one mutex, which also makes
//! [`RateLimitStore::admit`] atomic. [`MemoryStore::set_unavailable`]
//! simulates an outage so fail-open and fail-closed paths can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::repository::{Admission, CredentialStore, RateLimitStore, SessionStore, WindowUsage};
use super::timeouts::{StoreError, StoreResult};
use crate::auth::{CredentialRecord, PasswordHash, Role, Session, SessionId, UserId};

#[derive(Debug, Clone)]
struct RateLimitRecord {
    user_id: UserId,
    endpoint: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    credentials: HashMap<UserId, CredentialRecord>,
    roles: HashMap<UserId, Role>,
    sessions: HashMap<SessionId, Session>,
    rate_limits: Vec<RateLimitRecord>,
}

impl State {
    fn usage(&self, user_id: UserId, endpoint: &str, since: DateTime<Utc>) -> WindowUsage {
        self.rate_limits
            .iter()
            .filter(|r| r.user_id == user_id && r.endpoint == endpoint && r.created_at >= since)
            .fold(WindowUsage::default(), |usage, r| WindowUsage {
                count: usage.count + 1,
                oldest: Some(usage.oldest.map_or(r.created_at, |o| o.min(r.created_at))),
            })
    }
}

/// Store keeping every record in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user so sessions can resolve its role
    pub fn set_role(&self, user_id: UserId, role: Role) {
        self.lock().roles.insert(user_id, role);
    }

    /// Remove a user, as if the account had been deleted
    pub fn remove_user(&self, user_id: UserId) {
        let mut state = self.lock();
        state.roles.remove(&user_id);
        state.credentials.remove(&user_id);
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored sessions, expired ones included
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Number of stored rate limit records
    pub fn rate_limit_record_count(&self) -> usize {
        self.lock().rate_limits.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> StoreResult<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.lock())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_credentials(&self, user_id: UserId) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.available()?.credentials.get(&user_id).cloned())
    }

    async fn upsert_password(
        &self,
        user_id: UserId,
        password: &PasswordHash,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.available()?.credentials.insert(
            user_id,
            CredentialRecord {
                user_id,
                password: password.clone(),
                password_changed_at: changed_at,
                reset_token_hash: None,
                reset_token_expires_at: None,
            },
        );
        Ok(())
    }

    async fn upgrade_password(
        &self,
        user_id: UserId,
        expected: &PasswordHash,
        upgraded: &PasswordHash,
    ) -> StoreResult<bool> {
        let mut state = self.available()?;
        match state.credentials.get_mut(&user_id) {
            Some(record)
                if record.password.hash == expected.hash
                    && record.password.salt == expected.salt =>
            {
                record.password = upgraded.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_password_with_token(
        &self,
        token_hash: &str,
        password: &PasswordHash,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserId>> {
        let mut state = self.available()?;
        let Some(record) = state.credentials.values_mut().find(|r| {
            r.reset_token_hash.as_deref() == Some(token_hash)
                && r.reset_token_expires_at.is_some_and(|expires| expires >= now)
        }) else {
            return Ok(None);
        };

        record.password = password.clone();
        record.password_changed_at = now;
        record.reset_token_hash = None;
        record.reset_token_expires_at = None;
        Ok(Some(record.user_id))
    }

    async fn set_reset_token(
        &self,
        user_id: UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.available()?;
        match state.credentials.get_mut(&user_id) {
            Some(record) => {
                record.reset_token_hash = Some(token_hash.to_string());
                record.reset_token_expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<CredentialRecord>> {
        Ok(self
            .available()?
            .credentials
            .values()
            .find(|r| r.reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        self.available()?
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .available()?
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn find_by_refresh_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .available()?
            .sessions
            .values()
            .find(|s| s.refresh_token_hash == token_hash)
            .cloned())
    }

    async fn find_user_role(&self, user_id: UserId) -> StoreResult<Option<Role>> {
        Ok(self.available()?.roles.get(&user_id).copied())
    }

    async fn rotate_session(&self, old_id: SessionId, replacement: &Session) -> StoreResult<bool> {
        let mut state = self.available()?;
        if state.sessions.remove(&old_id).is_none() {
            return Ok(false);
        }
        state.sessions.insert(replacement.id, replacement.clone());
        Ok(true)
    }

    async fn delete_session(&self, session_id: SessionId) -> StoreResult<bool> {
        Ok(self.available()?.sessions.remove(&session_id).is_some())
    }

    async fn delete_user_sessions(&self, user_id: UserId) -> StoreResult<u64> {
        let mut state = self.available()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn list_active_sessions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let state = self.available()?;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.expires_at > now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.available()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.refresh_expires_at >= now);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn window_usage(
        &self,
        user_id: UserId,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<WindowUsage> {
        Ok(self.available()?.usage(user_id, endpoint, since))
    }

    async fn append_request(
        &self,
        user_id: UserId,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.available()?.rate_limits.push(RateLimitRecord {
            user_id,
            endpoint: endpoint.to_string(),
            created_at: at,
        });
        Ok(())
    }

    async fn admit(
        &self,
        user_id: UserId,
        endpoint: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Admission> {
        let mut state = self.available()?;
        let usage = state.usage(user_id, endpoint, since);
        if usage.count >= limit {
            return Ok(Admission {
                admitted: false,
                usage,
            });
        }

        state.rate_limits.push(RateLimitRecord {
            user_id,
            endpoint: endpoint.to_string(),
            created_at: at,
        });

        Ok(Admission {
            admitted: true,
            usage: WindowUsage {
                count: usage.count + 1,
                oldest: Some(usage.oldest.map_or(at, |o| o.min(at))),
            },
        })
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.available()?;
        let before = state.rate_limits.len();
        state.rate_limits.retain(|r| r.created_at >= cutoff);
        Ok((before - state.rate_limits.len()) as u64)
    }
}
