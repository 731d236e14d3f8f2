//! Resource Document Model
//!
//! A `Resource` is a single document belonging to a model (a typed collection).
//! Resources are owned by the database; the engine only holds short-lived
//! cached copies and the snapshots it needs to compute change notifications.
//!
//! # Pure JSON documents
//!
//! All resource data is a flat JSON object. The only structural requirement is
//! a string `id` field identifying the document within its model. Everything
//! else is schema-driven and validated by the model validator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name carrying the primary key of every resource.
pub const ID_FIELD: &str = "id";

/// A document belonging to a model.
///
/// Serialization is transparent: a `Resource` is exactly its JSON object on
/// the wire.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::models::Resource;
/// use serde_json::json;
///
/// let item = Resource::from_value(json!({"id": "i1", "owner": "u1"})).unwrap();
/// assert_eq!(item.id(), Some("i1"));
/// assert_eq!(item.get("owner"), Some(&json!("u1")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    fields: Map<String, Value>,
}

impl Resource {
    /// Create an empty resource
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resource from an existing field map
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a resource from a JSON value
    ///
    /// Returns `None` when the value is not a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// The resource's primary key, when present and a string
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Read a single field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Whether the field is present on the document
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Write a single field, replacing any previous value
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Remove a field, returning its previous value
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Overlay every `(field, value)` pair of `patch` onto this resource
    ///
    /// Patch values win over existing values, field by field.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (field, value) in patch {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// Borrow the underlying field map
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Iterate over the field names of the document
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Convert into the underlying JSON object value
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// The resource as a JSON object value
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Number of fields on the document
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Resource {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_fields(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_requires_object() {
        assert!(Resource::from_value(json!({"id": "a"})).is_some());
        assert!(Resource::from_value(json!("a")).is_none());
        assert!(Resource::from_value(json!([1, 2])).is_none());
        assert!(Resource::from_value(Value::Null).is_none());
    }

    #[test]
    fn test_id_must_be_string() {
        let with_string = Resource::from_value(json!({"id": "i1"})).unwrap();
        assert_eq!(with_string.id(), Some("i1"));

        let with_number = Resource::from_value(json!({"id": 42})).unwrap();
        assert_eq!(with_number.id(), None);

        let without = Resource::from_value(json!({"owner": "u1"})).unwrap();
        assert_eq!(without.id(), None);
    }

    #[test]
    fn test_merge_overwrites_field_by_field() {
        let mut resource = Resource::from_value(json!({
            "id": "i1",
            "owner": "u1",
            "label": "old"
        }))
        .unwrap();

        let patch = json!({"owner": "u2", "extra": true});
        resource.merge(patch.as_object().unwrap());

        assert_eq!(resource.get("owner"), Some(&json!("u2")));
        assert_eq!(resource.get("label"), Some(&json!("old")));
        assert_eq!(resource.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn test_transparent_serialization() {
        let value = json!({"id": "i1", "count": 3});
        let resource = Resource::from_value(value.clone()).unwrap();

        let serialized = serde_json::to_value(&resource).unwrap();
        assert_eq!(serialized, value);

        let deserialized: Resource = serde_json::from_value(value).unwrap();
        assert_eq!(deserialized, resource);
    }
}
