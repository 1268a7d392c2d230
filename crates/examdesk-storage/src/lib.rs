//! # examdesk-storage
//!
//! Document store abstraction for the examdesk backend.
//!
//! This crate defines the traits and types that every store backend implements.
//! Implementations live in separate crates (`examdesk-db-memory`, `examdesk-db-postgres`).
//!
//! ## Overview
//!
//! - [`DocumentStore`]: insert, single-field lookup, find-and-update returning the
//!   pre-image, find-and-delete, unique indexes
//! - [`ObjectId`]: 12-byte internal identifier with a 24-character hex form
//! - [`RequestContext`]: per-request deadline and cancellation
//!
//! ## Example
//!
//! ```ignore
//! use examdesk_storage::{DocumentStore, Filter, RequestContext};
//!
//! async fn lookup(store: &dyn DocumentStore, ctx: &RequestContext, sid: &str) {
//!     let doc = ctx
//!         .run(store.find_one("students", &Filter::eq("student_id", sid)))
//!         .await;
//! }
//! ```

mod context;
mod error;
mod object_id;
mod traits;
mod types;

pub use context::{Interrupted, RequestContext};
pub use error::{ErrorCategory, StorageError};
pub use object_id::{ObjectId, ObjectIdError};
pub use traits::DocumentStore;
pub use types::{Document, Filter, ID_FIELD, document_id};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared document store trait object.
pub type DynDocumentStore = std::sync::Arc<dyn DocumentStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use examdesk_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Document, DocumentStore, DynDocumentStore, Filter, ObjectId, RequestContext,
        StorageError, StorageResult,
    };
}
