//! Integration tests for the Kubernetes-backed object store
//!
//! These tests require a reachable cluster (current kubeconfig context) with
//! the Build CRD installed.

use kube_store::{KubeObjectStore, ObjectStore};
use std::collections::BTreeMap;

async fn store() -> KubeObjectStore {
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create Kubernetes client");
    KubeObjectStore::new(client)
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_missing_build_is_none() {
    let store = store().await;
    let build = store
        .get_build("default", "does-not-exist-0f3a")
        .await
        .expect("Failed to query Build");
    assert!(build.is_none());
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_build_crd_metadata_is_registered() {
    let store = store().await;
    let meta = store
        .get_crd_metadata("builds.forge.build")
        .await
        .expect("Failed to query CRD");
    assert!(meta.is_some(), "Build CRD is not installed");
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_list_pods_with_unmatched_selector() {
    let store = store().await;
    let selector = BTreeMap::from([(
        "batch.kubernetes.io/controller-uid".to_string(),
        "00000000-0000-0000-0000-000000000000".to_string(),
    )]);
    let pods = store
        .list_pods("default", &selector)
        .await
        .expect("Failed to list pods");
    assert!(pods.is_empty());
}
