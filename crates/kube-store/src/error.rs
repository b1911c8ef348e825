//! Object store errors

use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error other than not-found and conflict
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict or already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request rejected before it reached the API
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Expected absence rather than a backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Lost an optimistic concurrency race, or the object already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(error.to_string()),
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(error.to_string()),
            _ => Self::Kube(error),
        }
    }
}
