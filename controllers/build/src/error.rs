//! Controller-specific error types.
//!
//! Transient failures are returned from a reconcile pass and retried with
//! backoff. Terminal build failures are not errors: they are written to
//! `Build.status.failureReason` instead.

use kube::Error as KubeError;
use kube_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the Build Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A reference cannot be resolved
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// The referenced type does not declare compatible versions
    #[error("No compatible versions for CRD {crd}: label {label} is missing or empty")]
    MissingContract {
        /// CRD name
        crd: String,
        /// Expected label key
        label: String,
    },

    /// Object already has a different controller owner
    #[error("Object {0} is already owned by another controller")]
    AlreadyOwned(String),

    /// A field of an untyped object has an unexpected type
    #[error("Field {path} has unexpected type: expected {expected}")]
    FieldType {
        /// Dotted field path
        path: String,
        /// Expected JSON type
        expected: &'static str,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Several phases of one pass failed
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

fn join_errors(errors: &[ControllerError]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("[{}]", messages.join(", "))
}

impl ControllerError {
    /// Folds the errors of one pass into a single error, if any.
    pub fn combine(mut errors: Vec<ControllerError>) -> Option<ControllerError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_empty_is_none() {
        assert!(ControllerError::combine(Vec::new()).is_none());
    }

    #[test]
    fn test_combine_single_is_unwrapped() {
        let err = ControllerError::combine(vec![ControllerError::Watch("gone".to_string())]).unwrap();
        assert!(matches!(err, ControllerError::Watch(_)));
    }

    #[test]
    fn test_combine_many_lists_all_messages() {
        let err = ControllerError::combine(vec![
            ControllerError::Watch("a".to_string()),
            ControllerError::InvalidReference("b".to_string()),
        ])
        .unwrap();
        let message = err.to_string();
        assert!(message.contains("Resource watch failed: a"));
        assert!(message.contains("Invalid reference: b"));
    }
}
