//! Store trait definitions and their PostgreSQL implementations.
//!
//! The auth components only ever see these traits, so the same session and
//! rate limiting logic runs against PostgreSQL in production and against
//! [`MemoryStore`](super::MemoryStore) in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::timeouts::{
    DEFAULT_TRANSACTION_TIMEOUT, StoreError, StoreResult, with_default_timeout, with_long_timeout,
    with_timeout,
};
use crate::auth::{CredentialRecord, PasswordHash, Role, Session, SessionId, UserId};

/// Trait for credential record operations
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the credential record of a user
    async fn find_credentials(&self, user_id: UserId) -> StoreResult<Option<CredentialRecord>>;

    /// Store a new password hash, clearing any outstanding reset token
    async fn upsert_password(
        &self,
        user_id: UserId,
        password: &PasswordHash,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Swap in a re-hashed password while the stored hash is still `expected`
    ///
    /// Keeps the change timestamp and any outstanding reset token. Returns
    /// `false` when the password was replaced since `expected` was read.
    async fn upgrade_password(
        &self,
        user_id: UserId,
        expected: &PasswordHash,
        upgraded: &PasswordHash,
    ) -> StoreResult<bool>;

    /// Store a new password through a reset token in one step
    ///
    /// Only applies while `token_hash` is attached and unexpired at `now`, and
    /// clears it in the same write. Returns the owner of the token, or `None`
    /// when it is unknown, already used or expired.
    async fn reset_password_with_token(
        &self,
        token_hash: &str,
        password: &PasswordHash,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserId>>;

    /// Attach a reset token hash to an existing record
    ///
    /// Returns `false` when the user has no credential record.
    async fn set_reset_token(
        &self,
        user_id: UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Find the record holding a reset token hash
    async fn find_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<CredentialRecord>>;
}

/// Trait for session operations
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    /// Find session by token hash
    async fn find_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    /// Find session by refresh token hash
    async fn find_by_refresh_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    /// Role of the session owner, `None` if the user no longer exists
    async fn find_user_role(&self, user_id: UserId) -> StoreResult<Option<Role>>;

    /// Replace `old_id` with `replacement` in one step
    ///
    /// Returns `false` without inserting anything when `old_id` is already
    /// gone, which means another request rotated it first.
    async fn rotate_session(&self, old_id: SessionId, replacement: &Session) -> StoreResult<bool>;

    /// Delete one session
    async fn delete_session(&self, session_id: SessionId) -> StoreResult<bool>;

    /// Delete every session of a user
    async fn delete_user_sessions(&self, user_id: UserId) -> StoreResult<u64>;

    /// Sessions of a user whose access token is still valid at `now`, newest first
    async fn list_active_sessions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;

    /// Delete sessions whose refresh token lapsed before `now`
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Usage of one (user, endpoint) pair inside a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowUsage {
    /// Records in the window
    pub count: u32,
    /// Oldest record in the window
    pub oldest: Option<DateTime<Utc>>,
}

/// Outcome of an atomic count-and-append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether a record was appended
    pub admitted: bool,
    /// Usage after the operation
    pub usage: WindowUsage,
}

/// Trait for rate limit record operations
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count records for `user_id` + `endpoint` created at or after `since`
    async fn window_usage(
        &self,
        user_id: UserId,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<WindowUsage>;

    /// Append one record
    async fn append_request(
        &self,
        user_id: UserId,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Count and append-if-under-`limit` as a single atomic step
    async fn admit(
        &self,
        user_id: UserId,
        endpoint: &str,
        since: DateTime<Utc>,
        at: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Admission>;

    /// Delete records created before `cutoff`
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

const SESSION_COLUMNS: &str = "id, user_id, token, refresh_token, expires_at, \
     refresh_token_expires_at, user_agent, ip_address, created_at";

const CREDENTIAL_COLUMNS: &str = "user_id, password_hash, password_salt, password_iterations, \
     password_memory_kib, password_parallelism, password_changed_at, reset_token, \
     reset_token_expires_at";

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token")?,
        refresh_token_hash: row.try_get("refresh_token")?,
        expires_at: row.try_get("expires_at")?,
        refresh_expires_at: row.try_get("refresh_token_expires_at")?,
        user_agent: row.try_get("user_agent")?,
        ip_address: row.try_get("ip_address")?,
        created_at: row.try_get("created_at")?,
    })
}

fn cost_from_column(row: &PgRow, column: &str) -> StoreResult<u32> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| StoreError::MalformedRecord(format!("negative {column}: {value}")))
}

fn credential_from_row(row: &PgRow) -> StoreResult<CredentialRecord> {
    Ok(CredentialRecord {
        user_id: row.try_get("user_id")?,
        password: PasswordHash {
            hash: row.try_get("password_hash")?,
            salt: row.try_get("password_salt")?,
            iterations: cost_from_column(row, "password_iterations")?,
            memory_kib: cost_from_column(row, "password_memory_kib")?,
            parallelism: cost_from_column(row, "password_parallelism")?,
        },
        password_changed_at: row.try_get("password_changed_at")?,
        reset_token_hash: row.try_get("reset_token")?,
        reset_token_expires_at: row.try_get("reset_token_expires_at")?,
    })
}

fn cost_to_column(value: u32) -> StoreResult<i32> {
    i32::try_from(value)
        .map_err(|_| StoreError::MalformedRecord(format!("hash cost out of range: {value}")))
}

fn count_to_u32(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// PostgreSQL implementation of `CredentialStore`
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_credentials(&self, user_id: UserId) -> StoreResult<Option<CredentialRecord>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM user_credentials WHERE user_id = $1");
        let row = with_default_timeout(
            sqlx::query(&query)
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(credential_from_row).transpose()
    }

    async fn upsert_password(
        &self,
        user_id: UserId,
        password: &PasswordHash,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let iterations = cost_to_column(password.iterations)?;
        let memory_kib = cost_to_column(password.memory_kib)?;
        let parallelism = cost_to_column(password.parallelism)?;

        with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO user_credentials (
                    user_id, password_hash, password_salt, password_iterations,
                    password_memory_kib, password_parallelism, password_changed_at,
                    reset_token, reset_token_expires_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, NULL)
                ON CONFLICT (user_id)
                DO UPDATE SET
                    password_hash = EXCLUDED.password_hash,
                    password_salt = EXCLUDED.password_salt,
                    password_iterations = EXCLUDED.password_iterations,
                    password_memory_kib = EXCLUDED.password_memory_kib,
                    password_parallelism = EXCLUDED.password_parallelism,
                    password_changed_at = EXCLUDED.password_changed_at,
                    reset_token = NULL,
                    reset_token_expires_at = NULL
                "#,
            )
            .bind(user_id)
            .bind(&password.hash)
            .bind(&password.salt)
            .bind(iterations)
            .bind(memory_kib)
            .bind(parallelism)
            .bind(changed_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn upgrade_password(
        &self,
        user_id: UserId,
        expected: &PasswordHash,
        upgraded: &PasswordHash,
    ) -> StoreResult<bool> {
        let iterations = cost_to_column(upgraded.iterations)?;
        let memory_kib = cost_to_column(upgraded.memory_kib)?;
        let parallelism = cost_to_column(upgraded.parallelism)?;

        let result = with_default_timeout(
            sqlx::query(
                r#"
                UPDATE user_credentials
                SET password_hash = $4,
                    password_salt = $5,
                    password_iterations = $6,
                    password_memory_kib = $7,
                    password_parallelism = $8
                WHERE user_id = $1 AND password_hash = $2 AND password_salt = $3
                "#,
            )
            .bind(user_id)
            .bind(&expected.hash)
            .bind(&expected.salt)
            .bind(&upgraded.hash)
            .bind(&upgraded.salt)
            .bind(iterations)
            .bind(memory_kib)
            .bind(parallelism)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_password_with_token(
        &self,
        token_hash: &str,
        password: &PasswordHash,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserId>> {
        let iterations = cost_to_column(password.iterations)?;
        let memory_kib = cost_to_column(password.memory_kib)?;
        let parallelism = cost_to_column(password.parallelism)?;

        let row = with_default_timeout(
            sqlx::query(
                r#"
                UPDATE user_credentials
                SET password_hash = $3,
                    password_salt = $4,
                    password_iterations = $5,
                    password_memory_kib = $6,
                    password_parallelism = $7,
                    password_changed_at = $2,
                    reset_token = NULL,
                    reset_token_expires_at = NULL
                WHERE reset_token = $1 AND reset_token_expires_at >= $2
                RETURNING user_id
                "#,
            )
            .bind(token_hash)
            .bind(now)
            .bind(&password.hash)
            .bind(&password.salt)
            .bind(iterations)
            .bind(memory_kib)
            .bind(parallelism)
            .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(|r| r.try_get::<UserId, _>("user_id")).transpose()?)
    }

    async fn set_reset_token(
        &self,
        user_id: UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query(
                "UPDATE user_credentials SET reset_token = $2, reset_token_expires_at = $3 \
                 WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<CredentialRecord>> {
        let query =
            format!("SELECT {CREDENTIAL_COLUMNS} FROM user_credentials WHERE reset_token = $1");
        let row = with_default_timeout(
            sqlx::query(&query)
                .bind(token_hash)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(credential_from_row).transpose()
    }
}

/// PostgreSQL implementation of `SessionStore`
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_column(&self, column: &str, value: &str) -> StoreResult<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE {column} = $1");
        let row = with_default_timeout(
            sqlx::query(&query)
                .bind(value)
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.as_ref().map(session_from_row).transpose()?)
    }
}

async fn insert_session_with<'e, E>(executor: E, session: &Session) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO sessions (
            id, user_id, token, refresh_token, expires_at, refresh_token_expires_at,
            user_agent, ip_address, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(&session.token_hash)
    .bind(&session.refresh_token_hash)
    .bind(session.expires_at)
    .bind(session.refresh_expires_at)
    .bind(&session.user_agent)
    .bind(&session.ip_address)
    .bind(session.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        with_default_timeout(insert_session_with(&self.pool, session)).await
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        self.find_by_column("token", token_hash).await
    }

    async fn find_by_refresh_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        self.find_by_column("refresh_token", token_hash).await
    }

    async fn find_user_role(&self, user_id: UserId) -> StoreResult<Option<Role>> {
        let row = with_default_timeout(
            sqlx::query("SELECT role FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            Some(row) => {
                let role: String = row.try_get("role")?;
                Ok(Some(role.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn rotate_session(&self, old_id: SessionId, replacement: &Session) -> StoreResult<bool> {
        with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;

            if deleted.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(false);
            }

            insert_session_with(&mut *tx, replacement).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(true)
        })
        .await
    }

    async fn delete_session(&self, session_id: SessionId) -> StoreResult<bool> {
        let result = with_default_timeout(
            sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(session_id)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_sessions(&self, user_id: UserId) -> StoreResult<u64> {
        let result = with_default_timeout(
            sqlx::query("DELETE FROM sessions WHERE user_id = $1")
                .bind(user_id)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_active_sessions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND expires_at > $2 \
             ORDER BY created_at DESC"
        );
        let rows = with_default_timeout(
            sqlx::query(&query)
                .bind(user_id)
                .bind(now)
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = with_long_timeout(
            sqlx::query("DELETE FROM sessions WHERE refresh_token_expires_at < $1")
                .bind(now)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }
}

/// PostgreSQL implementation of `RateLimitStore`
#[derive(Clone)]
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn window_usage(
        &self,
        user_id: UserId,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<WindowUsage> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT COUNT(*) AS count, MIN(created_at) AS oldest
                FROM rate_limits
                WHERE user_id = $1 AND endpoint = $2 AND created_at >= $3
                "#,
            )
            .bind(user_id)
            .bind(endpoint)
            .bind(since)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(WindowUsage {
            count: count_to_u32(row.try_get("count")?),
            oldest: row.try_get("oldest")?,
        })
    }

    async fn append_request(
        &self,
        user_id: UserId,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        with_default_timeout(
            sqlx::query("INSERT INTO rate_limits (user_id, endpoint, created_at) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(endpoint)
                .bind(at)
                .execute(&self.pool),
        )
        .await?;

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
        let lock_key = format!("{user_id}:{endpoint}");

        with_timeout(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            // Serializes admission per (user, endpoint) until commit
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(&lock_key)
                .execute(&mut *tx)
                .await?;

            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS count, MIN(created_at) AS oldest
                FROM rate_limits
                WHERE user_id = $1 AND endpoint = $2 AND created_at >= $3
                "#,
            )
            .bind(user_id)
            .bind(endpoint)
            .bind(since)
            .fetch_one(&mut *tx)
            .await?;

            let count = count_to_u32(row.try_get("count")?);
            let oldest: Option<DateTime<Utc>> = row.try_get("oldest")?;

            if count >= limit {
                tx.rollback().await?;
                return Ok(Admission {
                    admitted: false,
                    usage: WindowUsage { count, oldest },
                });
            }

            sqlx::query("INSERT INTO rate_limits (user_id, endpoint, created_at) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(endpoint)
                .bind(at)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            Ok::<_, sqlx::Error>(Admission {
                admitted: true,
                usage: WindowUsage {
                    count: count + 1,
                    oldest: Some(oldest.map_or(at, |o| o.min(at))),
                },
            })
        })
        .await
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = with_long_timeout(
            sqlx::query("DELETE FROM rate_limits WHERE created_at < $1")
                .bind(cutoff)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }
}
