//! Table and index management.
//!
//! Each collection is one table `(id TEXT PRIMARY KEY, doc JSONB NOT NULL)`, created
//! on first use. Unique indexes are expression indexes on `doc ->> field`.

use std::sync::{Arc, LazyLock};

use dashmap::DashSet;
use regex::Regex;
use sqlx_postgres::PgPool;
use tracing::{debug, info, instrument};

use crate::error::{PostgresError, Result};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("Invalid identifier regex"));

/// Checks that a collection or field name is safe to interpolate into SQL.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > 48 || !IDENTIFIER_RE.is_match(name) {
        return Err(PostgresError::config(format!(
            "invalid identifier {name:?}: expected [a-z_][a-z0-9_]*"
        )));
    }
    Ok(())
}

/// Creates collection tables on demand and remembers which already exist.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
    created_tables: Arc<DashSet<String>>,
}

impl SchemaManager {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            created_tables: Arc::new(DashSet::new()),
        }
    }

    /// Ensures the table for `collection` exists. Idempotent.
    #[instrument(skip(self))]
    pub async fn ensure_table(&self, collection: &str) -> Result<()> {
        if self.created_tables.contains(collection) {
            return Ok(());
        }
        validate_identifier(collection)?;

        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{collection}" (
                id TEXT PRIMARY KEY,
                doc JSONB NOT NULL
            )"#
        );
        sqlx_core::query::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        debug!(collection, "collection table ready");
        self.created_tables.insert(collection.to_string());
        Ok(())
    }

    /// Creates the unique expression index on `doc ->> field`.
    ///
    /// Fails with a unique violation when existing rows already share a value.
    #[instrument(skip(self))]
    pub async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<()> {
        self.ensure_table(collection).await?;
        validate_identifier(field)?;

        let sql = format!(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "{collection}_{field}_key"
               ON "{collection}" ((doc ->> '{field}'))"#
        );
        sqlx_core::query::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        info!(collection, field, "unique index ensured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("students").is_ok());
        assert!(validate_identifier("student_id").is_ok());
        assert!(validate_identifier("_id").is_ok());
        assert!(validate_identifier("Students").is_err());
        assert!(validate_identifier("1students").is_err());
        assert!(validate_identifier("students; drop table x").is_err());
        assert!(validate_identifier("e'mail").is_err());
        assert!(validate_identifier("").is_err());
    }
}
