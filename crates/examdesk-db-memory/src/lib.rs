//! In-memory document store backend for the examdesk backend.
//!
//! This crate provides an in-memory implementation of the `DocumentStore` trait
//! from `examdesk-storage`, used by tests and for local development.
//!
//! # Example
//!
//! ```ignore
//! use examdesk_db_memory::InMemoryDocumentStore;
//! use examdesk_storage::{DocumentStore, Filter};
//!
//! let store = InMemoryDocumentStore::new();
//! store.ensure_unique_index("students", "email").await?;
//! let doc = store.find_one("students", &Filter::eq("email", "a@x.com")).await?;
//! ```

pub mod storage;

pub use examdesk_storage::{DocumentStore, StorageError};
pub use storage::InMemoryDocumentStore;

/// Creates a new shared in-memory document store.
pub fn create_document_store() -> examdesk_storage::DynDocumentStore {
    std::sync::Arc::new(InMemoryDocumentStore::new())
}
