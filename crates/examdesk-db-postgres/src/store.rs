//! PostgreSQL implementation of [`DocumentStore`].

use async_trait::async_trait;
use examdesk_storage::{
    Document, DocumentStore, Filter, ID_FIELD, ObjectId, StorageError, document_id,
};
use serde_json::Value;
use sqlx_core::types::Json;
use sqlx_postgres::PgPool;
use tracing::instrument;

use crate::config::PostgresConfig;
use crate::error::PostgresError;
use crate::pool;
use crate::schema::{SchemaManager, validate_identifier};

/// Document store keeping each collection in its own JSONB table.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
    schema: SchemaManager,
}

/// `WHERE` clause for a filter, with its single text parameter as `$1`.
#[derive(Debug)]
struct Condition {
    sql: String,
    param: String,
}

impl Condition {
    fn for_filter(filter: &Filter) -> Result<Self, StorageError> {
        if filter.is_id() {
            let id = filter
                .value()
                .as_str()
                .ok_or_else(|| StorageError::invalid_document("_id filter must be a string"))?;
            return Ok(Self {
                sql: "id = $1".into(),
                param: id.to_string(),
            });
        }

        let field = filter.field();
        validate_identifier(field).map_err(StorageError::from)?;
        Ok(match filter.value() {
            Value::String(s) => Self {
                sql: format!("doc ->> '{field}' = $1"),
                param: s.clone(),
            },
            other => Self {
                sql: format!("doc -> '{field}' = $1::jsonb"),
                param: other.to_string(),
            },
        })
    }
}

impl PostgresDocumentStore {
    /// Connects using `config`.
    pub async fn new(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(config).await?;
        Ok(Self::from_pool(pool))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            schema: SchemaManager::new(pool.clone()),
            pool,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table(&self, collection: &str) -> Result<(), StorageError> {
        self.schema
            .ensure_table(collection)
            .await
            .map_err(|e| e.into_storage(collection))
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<(), StorageError> {
        self.schema
            .ensure_unique_index(collection, field)
            .await
            .map_err(|e| match e.into_storage(collection) {
                // The index build found duplicates among existing rows.
                StorageError::AlreadyExists { collection, .. } => {
                    StorageError::already_exists(collection, field)
                }
                other => other,
            })
    }

    #[instrument(skip(self, doc))]
    async fn insert_one(&self, collection: &str, mut doc: Document) -> Result<ObjectId, StorageError> {
        self.table(collection).await?;
        let id = match doc.get(ID_FIELD) {
            None => ObjectId::new(),
            Some(_) => document_id(&doc).ok_or_else(|| {
                StorageError::invalid_document("_id must be a 24-character hex identifier")
            })?,
        };
        let key = id.to_hex();
        doc.insert(ID_FIELD.to_string(), Value::String(key.clone()));

        let sql = format!(r#"INSERT INTO "{collection}" (id, doc) VALUES ($1, $2)"#);
        sqlx_core::query::query(&sql)
            .bind(key)
            .bind(Json(doc))
            .execute(&self.pool)
            .await
            .map_err(|e| PostgresError::from(e).into_storage(collection))?;
        Ok(id)
    }

    #[instrument(skip(self, filter), fields(field = %filter.field()))]
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        self.table(collection).await?;
        let cond = Condition::for_filter(filter)?;

        let sql = format!(r#"SELECT doc FROM "{collection}" WHERE {} LIMIT 1"#, cond.sql);
        let row: Option<(Json<Document>,)> = sqlx_core::query_as::query_as(&sql)
            .bind(cond.param)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PostgresError::from(e).into_storage(collection))?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    #[instrument(skip(self, filter, set), fields(field = %filter.field()))]
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        mut set: Document,
    ) -> Result<Option<Document>, StorageError> {
        self.table(collection).await?;
        if let Some(new_id) = set.remove(ID_FIELD)
            && !(filter.is_id() && &new_id == filter.value())
        {
            return Err(StorageError::invalid_document("_id cannot be modified"));
        }
        let cond = Condition::for_filter(filter)?;

        // `target` locks the row and keeps its pre-image for the final SELECT.
        let sql = format!(
            r#"WITH target AS (
                SELECT id, doc FROM "{collection}" WHERE {cond} LIMIT 1 FOR UPDATE
            ), updated AS (
                UPDATE "{collection}" AS t SET doc = t.doc || $2
                FROM target WHERE t.id = target.id
            )
            SELECT target.doc FROM target"#,
            cond = cond.sql
        );
        let row: Option<(Json<Document>,)> = sqlx_core::query_as::query_as(&sql)
            .bind(cond.param)
            .bind(Json(set))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PostgresError::from(e).into_storage(collection))?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    #[instrument(skip(self, filter), fields(field = %filter.field()))]
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        self.table(collection).await?;
        let cond = Condition::for_filter(filter)?;

        let sql = format!(
            r#"DELETE FROM "{collection}" WHERE id = (
                SELECT id FROM "{collection}" WHERE {} LIMIT 1 FOR UPDATE
            ) RETURNING doc"#,
            cond.sql
        );
        let row: Option<(Json<Document>,)> = sqlx_core::query_as::query_as(&sql)
            .bind(cond.param)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PostgresError::from(e).into_storage(collection))?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        pool::ping(&self.pool).await.map_err(StorageError::from)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
