//! The document store trait that every backend implements.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::object_id::ObjectId;
use crate::types::{Document, Filter};

/// Authoritative store of record for account documents.
///
/// Implementations must be thread-safe (`Send + Sync`) and are shared as
/// [`DynDocumentStore`](crate::DynDocumentStore) handles across requests.
///
/// # Example
///
/// ```ignore
/// use examdesk_storage::{DocumentStore, Filter, StorageError};
///
/// async fn email_taken(store: &dyn DocumentStore, email: &str) -> Result<bool, StorageError> {
///     Ok(store
///         .find_one("students", &Filter::eq("email", email))
///         .await?
///         .is_some())
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Declares a unique constraint on a top-level field of a collection.
    ///
    /// Idempotent. Existing documents are expected to already satisfy it.
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<(), StorageError>;

    /// Inserts a document and returns its identifier.
    ///
    /// When the document has no `_id`, one is generated and written into the stored copy.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the identifier or any unique field
    /// value is already taken. Returns `StorageError::InvalidDocument` if `_id` is
    /// present but malformed.
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<ObjectId, StorageError>;

    /// Returns the first document matching `filter`, or `None`.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError>;

    /// Sets the given top-level fields on the first matching document.
    ///
    /// Returns the document as it was *before* the update, or `None` when nothing
    /// matched. `_id` cannot be changed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the update would violate a unique index.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<Option<Document>, StorageError>;

    /// Removes the first matching document and returns it, or `None` when nothing matched.
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError>;

    /// Lightweight round trip used by readiness probes.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
