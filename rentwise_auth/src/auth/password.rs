//! Password hashing, verification and strength policy.
//!
//! Hashes are derived with Argon2id (RFC 9106). The record keeps the salt and
//! the full cost next to the output, so raising the configured cost never
//! breaks verification of hashes produced under the old one.

use super::errors::{AuthResult, PasswordRule, SystemError, ValidationError};
use super::models::PasswordHash;
use crate::config::{ConfigError, parse_env_nonzero_or};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use subtle::ConstantTimeEq;

/// Minimum password length in characters
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Length of the derived key in bytes
pub const HASH_LENGTH: usize = 32;

/// Argon2id memory cost (19 MiB)
pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;

/// Argon2id time cost
pub const DEFAULT_ITERATIONS: u32 = 2;

/// Argon2id lanes
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Password hashing configuration
#[derive(Clone)]
pub struct PasswordConfig {
    /// Server-side secret appended to every password before derivation
    pub pepper: Option<String>,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl PasswordConfig {
    /// Load from `PASSWORD_PEPPER`, `PASSWORD_ARGON2_MEMORY_KIB`,
    /// `PASSWORD_ARGON2_ITERATIONS` and `PASSWORD_ARGON2_PARALLELISM`
    ///
    /// # Errors
    ///
    /// * `ConfigError::Invalid` - Argon2 rejects the cost combination
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            pepper: std::env::var("PASSWORD_PEPPER")
                .ok()
                .filter(|p| !p.is_empty()),
            memory_kib: parse_env_nonzero_or("PASSWORD_ARGON2_MEMORY_KIB", DEFAULT_MEMORY_KIB),
            iterations: parse_env_nonzero_or("PASSWORD_ARGON2_ITERATIONS", DEFAULT_ITERATIONS),
            parallelism: parse_env_nonzero_or("PASSWORD_ARGON2_PARALLELISM", DEFAULT_PARALLELISM),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the cost against the limits Argon2 enforces
    ///
    /// # Errors
    ///
    /// * `ConfigError::Invalid` - Names the variable holding the offending cost
    pub fn validate(&self) -> Result<(), ConfigError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(HASH_LENGTH),
        )
        .map(|_| ())
        .map_err(|e| {
            let var = match e {
                argon2::Error::MemoryTooLittle | argon2::Error::MemoryTooMuch => {
                    "PASSWORD_ARGON2_MEMORY_KIB"
                }
                argon2::Error::TimeTooSmall => "PASSWORD_ARGON2_ITERATIONS",
                _ => "PASSWORD_ARGON2_PARALLELISM",
            };
            ConfigError::Invalid {
                var: var.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            pepper: None,
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl std::fmt::Debug for PasswordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordConfig")
            .field("pepper", &self.pepper.as_ref().map(|_| "<redacted>"))
            .field("memory_kib", &self.memory_kib)
            .field("iterations", &self.iterations)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

/// Hashes and verifies passwords
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    config: PasswordConfig,
}

impl CredentialVerifier {
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    /// Hash a password under a fresh random salt and the configured cost
    ///
    /// # Errors
    ///
    /// * `SystemError::Hashing` - The configured cost is rejected by Argon2
    pub fn hash_password(&self, password: &str) -> AuthResult<PasswordHash> {
        let salt = SaltString::generate(&mut OsRng);
        let output = self.derive(
            password,
            &salt,
            self.config.memory_kib,
            self.config.iterations,
            self.config.parallelism,
        )
        .map_err(SystemError::Hashing)?;

        Ok(PasswordHash {
            hash: hex::encode(output),
            salt: salt.as_str().to_string(),
            iterations: self.config.iterations,
            memory_kib: self.config.memory_kib,
            parallelism: self.config.parallelism,
        })
    }

    /// Recompute the hash with the stored salt and cost and compare it in
    /// constant time
    ///
    /// # Errors
    ///
    /// * `SystemError::MalformedCredential` - The stored record cannot be
    ///   decoded or carries a cost Argon2 rejects
    pub fn verify_password(&self, password: &str, stored: &PasswordHash) -> AuthResult<bool> {
        let salt = SaltString::from_b64(&stored.salt)
            .map_err(|e| SystemError::MalformedCredential(format!("salt: {e}")))?;
        let expected = hex::decode(&stored.hash)
            .map_err(|e| SystemError::MalformedCredential(format!("hash: {e}")))?;
        if expected.len() != HASH_LENGTH {
            return Err(SystemError::MalformedCredential(format!(
                "hash is {} bytes, expected {HASH_LENGTH}",
                expected.len()
            ))
            .into());
        }

        let computed = self
            .derive(
                password,
                &salt,
                stored.memory_kib,
                stored.iterations,
                stored.parallelism,
            )
            .map_err(SystemError::MalformedCredential)?;

        Ok(computed.as_slice().ct_eq(expected.as_slice()).into())
    }

    /// Whether `stored` was derived under a different cost than the one
    /// currently configured
    pub fn needs_rehash(&self, stored: &PasswordHash) -> bool {
        stored.memory_kib != self.config.memory_kib
            || stored.iterations != self.config.iterations
            || stored.parallelism != self.config.parallelism
    }

    fn derive(
        &self,
        password: &str,
        salt: &SaltString,
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<[u8; HASH_LENGTH], String> {
        let params = Params::new(memory_kib, iterations, parallelism, Some(HASH_LENGTH))
            .map_err(|e| e.to_string())?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let peppered = match &self.config.pepper {
            Some(pepper) => format!("{password}{pepper}"),
            None => password.to_string(),
        };

        let mut output = [0u8; HASH_LENGTH];
        argon2
            .hash_password_into(peppered.as_bytes(), salt.as_str().as_bytes(), &mut output)
            .map_err(|e| e.to_string())?;
        Ok(output)
    }
}

/// Validate password strength
///
/// Every rule is checked and every failure reported, so the caller can show
/// all problems at once.
///
/// # Errors
///
/// * `AuthError::Validation` - One or more rules failed
pub fn validate_password_strength(password: &str) -> AuthResult<()> {
    let mut violations = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        violations.push(PasswordRule::TooShort {
            min_length: MIN_PASSWORD_LENGTH,
        });
    }
    if !password.chars().any(char::is_uppercase) {
        violations.push(PasswordRule::MissingUppercase);
    }
    if !password.chars().any(char::is_lowercase) {
        violations.push(PasswordRule::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordRule::MissingDigit);
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        violations.push(PasswordRule::MissingSpecial);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations }.into())
    }
}
