//! Authentication data models.

use crate::db::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// User ID type
pub type UserId = Uuid;

/// Session ID type
pub type SessionId = Uuid;

/// Role of a platform user, read alongside a validated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Landlord,
    PropertyManager,
    Tenant,
}

impl Role {
    /// Column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Landlord => "landlord",
            Role::PropertyManager => "property_manager",
            Role::Tenant => "tenant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "landlord" => Ok(Role::Landlord),
            "property_manager" => Ok(Role::PropertyManager),
            "tenant" => Ok(Role::Tenant),
            other => Err(StoreError::MalformedRecord(format!("unknown role '{other}'"))),
        }
    }
}

/// Derived password hash together with everything needed to recompute it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    /// Hex-encoded Argon2id output
    pub hash: String,
    /// B64 salt, unique per record
    pub salt: String,
    /// Argon2 time cost
    pub iterations: u32,
    /// Argon2 memory cost in KiB
    pub memory_kib: u32,
    /// Argon2 lanes
    pub parallelism: u32,
}

/// Credential record owned by the user entity
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub user_id: UserId,
    pub password: PasswordHash,
    pub password_changed_at: DateTime<Utc>,
    /// SHA-256 of the outstanding reset token, if any
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
}

/// Persisted session
///
/// Only token hashes are kept. The raw values exist once, in the
/// [`IssuedSession`] returned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    #[serde(skip_serializing)]
    pub token_hash: String,
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether the access token has lapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the refresh token has lapsed at `now`
    pub fn is_refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.refresh_expires_at
    }
}

/// Session as handed back to the client at creation or refresh
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub session: Session,
    pub token: String,
    pub refresh_token: String,
}

/// Identity resolved from a valid session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: Role,
}

/// Password reset token handed to the notification layer for delivery
#[derive(Debug, Clone)]
pub struct PasswordResetTicket {
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
