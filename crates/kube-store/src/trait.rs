//! ObjectStore trait for mocking
//!
//! This trait abstracts the Kubernetes API surface the Build controller
//! depends on. `KubeObjectStore` implements it against a live cluster, and
//! tests use the in-memory `MockObjectStore`.

use crate::error::StoreError;
use crds::Build;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::collections::BTreeMap;

/// Trait for object store operations
///
/// Getters return `Ok(None)` for absent objects so that expected absence is
/// an ordinary branch. Patches are JSON merge patches; a patch carrying
/// `metadata.resourceVersion` fails with `StoreError::Conflict` when stale.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    // Builds
    async fn get_build(&self, namespace: &str, name: &str) -> Result<Option<Build>, StoreError>;
    async fn patch_build(&self, namespace: &str, name: &str, patch: &Value) -> Result<Build, StoreError>;
    async fn patch_build_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<Build, StoreError>;

    // Schema registry
    async fn get_crd_metadata(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError>;

    // Untyped objects
    async fn get_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<Option<DynamicObject>, StoreError>;
    async fn list_objects(&self, gvk: &GroupVersionKind, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError>;
    async fn patch_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str, patch: &Value) -> Result<DynamicObject, StoreError>;
    async fn delete_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<(), StoreError>;

    // Jobs and Pods
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, StoreError>;
    async fn create_job(&self, job: &Job) -> Result<Job, StoreError>;
    /// Deletes with background propagation so the Job's Pods follow.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>, StoreError>;
}

/// Renders an equality label selector, e.g. `a=1,b=2`.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
