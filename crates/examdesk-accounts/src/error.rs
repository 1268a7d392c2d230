//! Account error types.

use examdesk_cache::CacheAsideError;
use examdesk_storage::{Interrupted, StorageError};

/// Errors returned by account repositories.
///
/// `Clone` because one document-store fetch may be shared by several waiting requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    /// No document matched the lookup.
    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
    },

    /// A document with the same unique value already exists.
    #[error("{entity} with this {field} already exists")]
    AlreadyExists {
        entity: &'static str,
        field: String,
    },

    /// Unknown account, wrong password or deactivated account.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Password does not meet the credential policy.
    #[error("weak password: {reason}")]
    WeakPassword { reason: String },

    /// Request data failed validation.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The document store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored document does not match the entity shape.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// The request was cancelled or ran out of time.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// Password hashing failed.
    #[error("password hashing failed: {message}")]
    Hashing { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AccountError {
    #[must_use]
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn weak_password(reason: impl Into<String>) -> Self {
        Self::WeakPassword {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    #[must_use]
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::InvalidCredentials)
    }

    /// Returns `true` for caller mistakes (as opposed to infrastructure failures).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::InvalidCredentials
                | Self::WeakPassword { .. }
                | Self::InvalidInput { .. }
        )
    }

    /// Maps a duplicate-key failure to `AlreadyExists` for `entity`.
    pub(crate) fn from_storage(entity: &'static str, error: StorageError) -> Self {
        match error {
            StorageError::AlreadyExists { field, .. } => Self::AlreadyExists { entity, field },
            other => Self::Storage(other),
        }
    }
}

impl From<CacheAsideError> for AccountError {
    fn from(e: CacheAsideError) -> Self {
        match e {
            CacheAsideError::Interrupted(interrupted) => Self::Interrupted(interrupted),
            CacheAsideError::Serialization { message }
            | CacheAsideError::Deserialization { message } => Self::Serialization { message },
            CacheAsideError::FetchAborted { key } => Self::Internal {
                message: format!("fetch for {key} aborted"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_classification() {
        let err = AccountError::from_storage(
            "student",
            StorageError::already_exists("students", "email"),
        );
        assert_eq!(
            err,
            AccountError::AlreadyExists {
                entity: "student",
                field: "email".into()
            }
        );
        assert_eq!(err.to_string(), "student with this email already exists");

        let err = AccountError::from_storage("student", StorageError::connection_error("down"));
        assert!(matches!(err, AccountError::Storage(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_cache_aside_conversion() {
        let err = AccountError::from(CacheAsideError::Interrupted(Interrupted::Cancelled));
        assert_eq!(err, AccountError::Interrupted(Interrupted::Cancelled));

        let err = AccountError::from(CacheAsideError::Deserialization {
            message: "missing field".into(),
        });
        assert!(matches!(err, AccountError::Serialization { .. }));
    }

    #[test]
    fn test_credentials_message_is_generic() {
        assert_eq!(AccountError::InvalidCredentials.to_string(), "invalid credentials");
        assert!(AccountError::InvalidCredentials.is_client_error());
    }
}
