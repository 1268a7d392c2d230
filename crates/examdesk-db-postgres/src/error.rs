//! Error types for the PostgreSQL document store.

use examdesk_storage::{ID_FIELD, StorageError};
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique violations (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Errors specific to the PostgreSQL document store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Converts into a [`StorageError`] for a write against `table`.
    ///
    /// Unique violations become `AlreadyExists`, naming the field recovered from the
    /// index name (`<table>_<field>_key`, or `<table>_pkey` for the identifier).
    pub(crate) fn into_storage(self, table: &str) -> StorageError {
        match self {
            Self::Database(ref e) if has_pg_error_code(e, PG_UNIQUE_VIOLATION) => {
                let constraint = match e {
                    SqlxError::Database(db_err) => db_err.constraint().unwrap_or_default(),
                    _ => "",
                };
                StorageError::already_exists(table, field_from_constraint(table, constraint))
            }
            other => other.into(),
        }
    }
}

fn field_from_constraint(table: &str, constraint: &str) -> String {
    if constraint == format!("{table}_pkey") {
        return ID_FIELD.to_string();
    }
    constraint
        .strip_prefix(table)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix("_key"))
        .unwrap_or(constraint)
        .to_string()
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Database(e @ (SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_))) => {
                StorageError::connection_error(e.to_string())
            }
            PostgresError::Database(e) => StorageError::internal(e.to_string()),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PostgresError::config("invalid collection name");
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_field_from_constraint() {
        assert_eq!(field_from_constraint("students", "students_pkey"), "_id");
        assert_eq!(field_from_constraint("students", "students_email_key"), "email");
        assert_eq!(
            field_from_constraint("students", "students_student_id_key"),
            "student_id"
        );
        assert_eq!(field_from_constraint("students", "other"), "other");
    }

    #[test]
    fn test_pool_errors_are_connection_errors() {
        let err: StorageError = PostgresError::Database(SqlxError::PoolTimedOut).into();
        assert!(err.is_connection_error());

        let err: StorageError = PostgresError::config("bad").into();
        assert!(matches!(err, StorageError::Internal { .. }));
    }
}
