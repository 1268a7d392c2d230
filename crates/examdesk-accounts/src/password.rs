//! Credential policy and Argon2id password hashing.
//!
//! - Passwords need at least 8 characters, one digit and one uppercase letter
//! - Hashes are PHC strings (`$argon2id$...`) with a random salt from `OsRng`
//! - Verification of an unknown account runs against a fixed dummy hash so the
//!   "no such account" path costs as much as the "wrong password" path

use std::sync::{Arc, OnceLock};

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

use crate::error::AccountError;

/// Minimum password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Checks a plaintext password against the credential policy.
pub fn validate_password(password: &str) -> Result<(), AccountError> {
    if password.is_empty() {
        return Err(AccountError::weak_password("password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::weak_password(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    let has_digit = password.chars().any(char::is_numeric);
    let has_upper = password.chars().any(char::is_uppercase);
    if !has_digit || !has_upper {
        return Err(AccountError::weak_password(
            "password must contain at least one number and one uppercase letter",
        ));
    }
    Ok(())
}

/// Argon2id hasher shared by the repositories.
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    dummy_hash: OnceLock<Option<String>>,
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher").finish_non_exhaustive()
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::from_argon2(Argon2::default())
    }
}

impl CredentialHasher {
    /// Hasher with the Argon2id default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hasher with explicit cost parameters (memory in KiB, iterations, lanes).
    pub fn with_params(memory_kib: u32, iterations: u32, lanes: u32) -> Result<Self, AccountError> {
        let params = Params::new(memory_kib, iterations, lanes, None).map_err(|e| {
            AccountError::Hashing {
                message: e.to_string(),
            }
        })?;
        Ok(Self::from_argon2(Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            params,
        )))
    }

    fn from_argon2(argon2: Argon2<'static>) -> Self {
        Self {
            argon2,
            dummy_hash: OnceLock::new(),
        }
    }

    /// Hashes a password into a PHC string.
    pub fn hash(&self, password: &str) -> Result<String, AccountError> {
        if password.is_empty() {
            return Err(AccountError::weak_password("password cannot be empty"));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AccountError::Hashing {
                message: e.to_string(),
            })?;
        Ok(hash.to_string())
    }

    /// Returns `true` only when `password` matches `hash`.
    ///
    /// Empty inputs and malformed hashes are a mismatch.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        if password.is_empty() || hash.is_empty() {
            return false;
        }
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("stored password hash is malformed");
            return false;
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Spends one verification on a fixed hash. Always returns `false`.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let dummy = self
            .dummy_hash
            .get_or_init(|| self.hash("Dummy-Password-0").ok());
        if let Some(hash) = dummy {
            let _ = self.verify(password, hash);
        }
        false
    }
}

/// Argon2 is deliberately slow; these run it on the blocking pool instead of
/// an async worker thread.
impl CredentialHasher {
    pub async fn hash_async(self: &Arc<Self>, password: &str) -> Result<String, AccountError> {
        let hasher = Arc::clone(self);
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AccountError::Hashing {
                message: e.to_string(),
            })?
    }

    pub async fn verify_async(self: &Arc<Self>, password: &str, hash: &str) -> bool {
        let hasher = Arc::clone(self);
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "password verification task failed");
                false
            })
    }

    pub async fn verify_dummy_async(self: &Arc<Self>, password: &str) -> bool {
        let hasher = Arc::clone(self);
        let password = password.to_owned();
        let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&password)).await;
        false
    }
}
