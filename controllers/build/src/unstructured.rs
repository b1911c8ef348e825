//! Field access on untyped (schema-unknown) objects.
//!
//! Referenced provider objects are only read through a few conventional
//! paths under `status`. A missing field is `None`; a field of the wrong
//! JSON type is an error.

use crate::error::ControllerError;
use serde_json::Value;

/// Value at `path`, treating explicit `null` as absent
pub fn nested_field<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(doc, |value, key| value.get(key))
        .filter(|value| !value.is_null())
}

/// Boolean at `path`
pub fn nested_bool(doc: &Value, path: &[&str]) -> Result<Option<bool>, ControllerError> {
    match nested_field(doc, path) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ControllerError::FieldType { path: path.join("."), expected: "bool" }),
    }
}

/// String at `path`
pub fn nested_string(doc: &Value, path: &[&str]) -> Result<Option<String>, ControllerError> {
    match nested_field(doc, path) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ControllerError::FieldType { path: path.join("."), expected: "string" }),
    }
}
