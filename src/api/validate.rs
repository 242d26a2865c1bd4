//! Declarative JSON field validation
//!
//! Request bodies are checked against a field schema built once at startup:
//! a tree mapping each field path to its allowed children. Unknown fields
//! fail the request with a `rogue field(path)` error instead of being
//! silently dropped.

use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Allowed-field tree for one JSON document shape
#[derive(Debug, Default, Clone)]
pub struct FieldSchema {
    fields: HashMap<String, FieldSchema>,
}

impl FieldSchema {
    /// A leaf: accepts any scalar or array of scalars, no child objects.
    pub fn leaf() -> Self {
        Self::default()
    }

    /// Add an allowed child field.
    pub fn field(mut self, name: impl Into<String>, child: FieldSchema) -> Self {
        self.fields.insert(name.into(), child);
        self
    }

    /// Validate a parsed JSON document against this schema.
    pub fn check(&self, value: &Value) -> Result<()> {
        self.check_at("", value)
    }

    fn check_at(&self, path: &str, value: &Value) -> Result<()> {
        match value {
            Value::Object(map) => {
                for (key, child_value) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    let child = self
                        .fields
                        .get(key)
                        .ok_or_else(|| Error::RogueField(child_path.clone()))?;
                    child.check_at(&child_path, child_value)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    self.check_at(path, item)?;
                }
                Ok(())
            }
            // scalars carry no field names to validate
            _ => Ok(()),
        }
    }
}

/// Schema of the runtime config patch body; derived once at startup.
pub fn config_patch_schema() -> FieldSchema {
    FieldSchema::default()
        .field("auto_tagging_prefix", FieldSchema::leaf())
        .field("series_limit", FieldSchema::leaf())
        .field("limit", FieldSchema::leaf())
        .field("request_query_with_debug", FieldSchema::leaf())
        .field("elide_zero_tags", FieldSchema::leaf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_fields_pass() {
        let schema = config_patch_schema();
        schema
            .check(&json!({"series_limit": 100, "elide_zero_tags": false}))
            .unwrap();
    }

    #[test]
    fn test_rogue_top_level_field() {
        let schema = config_patch_schema();
        let err = schema.check(&json!({"series_limt": 100})).unwrap_err();
        assert_eq!(err.to_string(), "rogue field(series_limt)");
    }

    #[test]
    fn test_rogue_nested_field_reports_path() {
        let schema = FieldSchema::default()
            .field("writer", FieldSchema::default().field("batch_size", FieldSchema::leaf()));
        let err = schema
            .check(&json!({"writer": {"batch_sise": 1}}))
            .unwrap_err();
        assert_eq!(err.to_string(), "rogue field(writer.batch_sise)");
    }

    #[test]
    fn test_object_under_leaf_is_rogue() {
        let schema = config_patch_schema();
        let err = schema
            .check(&json!({"limit": {"max": 10}}))
            .unwrap_err();
        assert_eq!(err.to_string(), "rogue field(limit.max)");
    }

    #[test]
    fn test_arrays_of_objects_validate_elements() {
        let schema = FieldSchema::default().field(
            "rules",
            FieldSchema::default().field("name", FieldSchema::leaf()),
        );
        schema
            .check(&json!({"rules": [{"name": "a"}, {"name": "b"}]}))
            .unwrap();
        assert!(schema
            .check(&json!({"rules": [{"nam": "a"}]}))
            .is_err());
    }
}
