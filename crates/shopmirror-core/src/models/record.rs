//! Record model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A cached domain record: an opaque JSON payload plus its reconciliation key.
///
/// Serialized flat, so `Record { id: "o1", fields: {"total": 100} }` becomes
/// `{"id": "o1", "total": 100}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, stable across sync cycles
    pub id: String,
    /// Remaining payload fields (never contains `id`)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record, dropping any `id` entry from `fields` in favour of `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Parse a stored JSON object that carries a string `id`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        match fields.remove("id") {
            Some(Value::String(id)) => Some(Self { id, fields }),
            _ => None,
        }
    }

    /// Convert into the flat JSON object written to the local store.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert("id".to_string(), Value::String(self.id));
        object.extend(self.fields);
        Value::Object(object)
    }

    /// Look up a payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The `createdAt` field when it is a string.
    pub fn created_at(&self) -> Option<&str> {
        self.fields.get("createdAt").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn new_drops_duplicate_id_field() {
        let Value::Object(fields) = json!({"id": "other", "total": 5}) else {
            unreachable!()
        };
        let record = Record::new("o1", fields);
        assert_eq!(record.id, "o1");
        assert!(record.get("id").is_none());
        assert_eq!(record.get("total"), Some(&json!(5)));
    }

    #[test]
    fn serializes_flat() {
        let record = Record::from_value(json!({"id": "o1", "total": 100})).unwrap();
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": "o1", "total": 100})
        );
        assert_eq!(record.into_value(), json!({"id": "o1", "total": 100}));
    }

    #[test]
    fn from_value_requires_string_id() {
        assert!(Record::from_value(json!({"total": 1})).is_none());
        assert!(Record::from_value(json!({"id": 7})).is_none());
        assert!(Record::from_value(json!("o1")).is_none());
    }

    #[test]
    fn created_at_only_reads_strings() {
        let record =
            Record::from_value(json!({"id": "o1", "createdAt": "2024-06-01T00:00:00Z"})).unwrap();
        assert_eq!(record.created_at(), Some("2024-06-01T00:00:00Z"));

        let numeric = Record::from_value(json!({"id": "o2", "createdAt": 17})).unwrap();
        assert_eq!(numeric.created_at(), None);
    }
}
