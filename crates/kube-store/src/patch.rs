//! JSON merge patch (RFC 7386) generation
//!
//! The controller never writes whole objects. It serializes the object before
//! and after a reconcile pass and sends only the difference, so an unchanged
//! object produces no write at all.

use serde_json::{Map, Value};

/// Computes the merge patch turning `before` into `after`.
///
/// Returns `None` when the documents are equal. Removed keys become `null`;
/// arrays are replaced wholesale.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new_value) => {
                        if let Some(diff) = merge_diff(old_value, new_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if before == after => None,
        _ => Some(after.clone()),
    }
}

/// Pins a patch to a resourceVersion so a concurrent write makes it fail
/// with a conflict instead of silently merging.
pub fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    if let (Some(rv), Value::Object(fields)) = (resource_version, &mut patch) {
        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
        }
    }
    patch
}
