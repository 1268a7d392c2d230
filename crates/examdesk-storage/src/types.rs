//! Core document types for the storage abstraction layer.

use serde_json::Value;

use crate::object_id::ObjectId;

/// Name of the field holding a document's internal identifier.
pub const ID_FIELD: &str = "_id";

/// A stored document: a JSON object with its identifier under [`ID_FIELD`].
pub type Document = serde_json::Map<String, Value>;

/// Single-field equality filter.
///
/// Lookups in this system always go through exactly one field (the internal
/// identifier or one natural key), so richer query shapes are not modelled.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    value: Value,
}

impl Filter {
    /// Matches documents whose top-level `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Matches the document with the given internal identifier.
    pub fn by_id(id: ObjectId) -> Self {
        Self::eq(ID_FIELD, id.to_hex())
    }

    /// The field being matched.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The value the field must equal.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns `true` if this filter targets the internal identifier.
    pub fn is_id(&self) -> bool {
        self.field == ID_FIELD
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

/// Reads the identifier of a stored document, if it carries a valid one.
pub fn document_id(doc: &Document) -> Option<ObjectId> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|raw| ObjectId::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_filter_matches_field() {
        let d = doc(json!({"student_id": "S1", "email": "a@x.com"}));
        assert!(Filter::eq("student_id", "S1").matches(&d));
        assert!(!Filter::eq("student_id", "S2").matches(&d));
        assert!(!Filter::eq("missing", "S1").matches(&d));
    }

    #[test]
    fn test_filter_by_id() {
        let id = ObjectId::new();
        let d = doc(json!({"_id": id.to_hex()}));
        let filter = Filter::by_id(id);
        assert!(filter.is_id());
        assert!(filter.matches(&d));
        assert_eq!(document_id(&d), Some(id));
    }

    #[test]
    fn test_document_id_ignores_malformed() {
        assert_eq!(document_id(&doc(json!({"_id": "S1"}))), None);
        assert_eq!(document_id(&doc(json!({}))), None);
    }
}
