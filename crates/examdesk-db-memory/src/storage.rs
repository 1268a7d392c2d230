use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use examdesk_storage::{
    Document, DocumentStore, Filter, ID_FIELD, ObjectId, StorageError, document_id,
};
use papaya::HashMap as PapayaHashMap;
use serde_json::Value;
use tokio::sync::RwLock;

/// Documents of one collection, keyed by hex identifier.
#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, Document>,
    unique_fields: BTreeSet<String>,
}

impl Collection {
    fn find_key(&self, filter: &Filter) -> Option<String> {
        if filter.is_id() {
            let id = filter.value().as_str()?;
            return self.docs.contains_key(id).then(|| id.to_string());
        }
        self.docs
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id.clone())
    }

    /// Field whose unique value `doc` would duplicate, ignoring the document `skip_id`.
    fn conflicting_field(&self, doc: &Document, skip_id: &str) -> Option<String> {
        self.unique_fields
            .iter()
            .find(|field| {
                let Some(value) = doc.get(field.as_str()).filter(|v| !v.is_null()) else {
                    return false;
                };
                self.docs
                    .iter()
                    .any(|(id, other)| id != skip_id && other.get(field.as_str()) == Some(value))
            })
            .cloned()
    }
}

/// In-memory document store using a papaya lock-free map of collections.
///
/// Each collection sits behind its own `RwLock`, so uniqueness checks and the write
/// that follows them happen atomically per collection while unrelated collections
/// never contend.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: PapayaHashMap<String, Arc<RwLock<Collection>>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<RwLock<Collection>> {
        let guard = self.collections.pin();
        guard
            .get_or_insert_with(name.to_string(), || Arc::new(RwLock::new(Collection::default())))
            .clone()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collection(collection).read().await.docs.len()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<(), StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.write().await;
        if coll.unique_fields.contains(field) {
            return Ok(());
        }

        let mut seen = Vec::new();
        for doc in coll.docs.values() {
            if let Some(value) = doc.get(field).filter(|v| !v.is_null()) {
                if seen.contains(&value) {
                    return Err(StorageError::already_exists(collection, field));
                }
                seen.push(value);
            }
        }
        coll.unique_fields.insert(field.to_string());
        tracing::debug!(collection, field, "unique index registered");
        Ok(())
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> Result<ObjectId, StorageError> {
        let id = match doc.get(ID_FIELD) {
            None => ObjectId::new(),
            Some(_) => document_id(&doc).ok_or_else(|| {
                StorageError::invalid_document("_id must be a 24-character hex identifier")
            })?,
        };
        let key = id.to_hex();
        doc.insert(ID_FIELD.to_string(), Value::String(key.clone()));

        let coll = self.collection(collection);
        let mut coll = coll.write().await;
        if coll.docs.contains_key(&key) {
            return Err(StorageError::already_exists(collection, ID_FIELD));
        }
        if let Some(field) = coll.conflicting_field(&doc, &key) {
            return Err(StorageError::already_exists(collection, field));
        }
        coll.docs.insert(key, doc);
        Ok(id)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        let coll = self.collection(collection);
        let coll = coll.read().await;
        Ok(coll
            .find_key(filter)
            .and_then(|key| coll.docs.get(&key).cloned()))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<Option<Document>, StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.write().await;
        let Some(key) = coll.find_key(filter) else {
            return Ok(None);
        };
        if let Some(new_id) = set.get(ID_FIELD)
            && new_id.as_str() != Some(key.as_str())
        {
            return Err(StorageError::invalid_document("_id cannot be modified"));
        }

        let Some(previous) = coll.docs.get(&key).cloned() else {
            return Ok(None);
        };
        let mut updated = previous.clone();
        updated.extend(set);
        if let Some(field) = coll.conflicting_field(&updated, &key) {
            return Err(StorageError::already_exists(collection, field));
        }
        coll.docs.insert(key, updated);
        Ok(Some(previous))
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.write().await;
        Ok(coll.find_key(filter).and_then(|key| coll.docs.remove(&key)))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
