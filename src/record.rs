//! Record: an opaque content-type-specific map of fields
//!
//! Every record carries a `uid` (source-system identifier). `parent_uid`
//! and `_version` are optional and only interpreted by the components
//! that need them (tree building, version-aware exports).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the source-system identifier
pub const UID_FIELD: &str = "uid";
/// Field holding the parent link for hierarchical content
pub const PARENT_UID_FIELD: &str = "parent_uid";
/// Field holding the per-record revision counter
pub const VERSION_FIELD: &str = "_version";

/// A single content record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create a record with only a uid
    pub fn new(uid: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(UID_FIELD.to_string(), Value::String(uid.into()));
        Record(fields)
    }

    /// Wrap an existing field map
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Record(fields)
    }

    /// Interpret a JSON value as a record. Non-objects are rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Record(fields)),
            _ => None,
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn uid(&self) -> Option<&str> {
        self.get_str(UID_FIELD)
    }

    /// Parent uid; an explicit JSON `null` reads as absent
    pub fn parent_uid(&self) -> Option<&str> {
        self.get_str(PARENT_UID_FIELD)
    }

    pub fn version(&self) -> Option<u64> {
        self.0.get(VERSION_FIELD).and_then(Value::as_u64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Reduced copy holding only the picked fields.
    ///
    /// Fields absent from the record are skipped, never synthesised, so a
    /// projection is always a subset of the record.
    pub fn project<S: AsRef<str>>(&self, fields: &[S]) -> Record {
        let mut picked = Map::new();
        for field in fields {
            let field = field.as_ref();
            if let Some(value) = self.0.get(field) {
                picked.insert(field.to_string(), value.clone());
            }
        }
        Record(picked)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Record(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_accessors() {
        let record = Record::new("blt1")
            .with(PARENT_UID_FIELD, "blt0")
            .with(VERSION_FIELD, 3)
            .with("title", "Hello");

        assert_eq!(record.uid(), Some("blt1"));
        assert_eq!(record.parent_uid(), Some("blt0"));
        assert_eq!(record.version(), Some(3));
        assert_eq!(record.get_str("title"), Some("Hello"));
    }

    #[test]
    fn test_null_parent_reads_as_root() {
        let record = Record::new("blt1").with(PARENT_UID_FIELD, Value::Null);
        assert_eq!(record.parent_uid(), None);
    }

    #[test]
    fn test_projection_is_subset() {
        let record = Record::new("a1")
            .with("url", "https://cdn/a1.png")
            .with("filename", "a1.png")
            .with("size", 42);

        let projected = record.project(&["uid", "url", "missing"]);
        assert_eq!(projected.fields().len(), 2);
        assert!(projected.fields().keys().all(|k| record.contains(k)));
        assert!(!projected.contains("missing"));
    }

    #[test]
    fn test_transparent_serialization() {
        let record = Record::new("x").with("n", 1);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"uid": "x", "n": 1}));

        let parsed: Record = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_none());
        assert!(Record::from_value(json!({"uid": "a"})).is_some());
    }
}
