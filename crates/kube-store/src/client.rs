//! Kubernetes-backed object store

use crate::error::StoreError;
use crate::store_trait::{label_selector, ObjectStore};
use crds::Build;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Object store backed by a kube `Client`
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store over an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn builds(&self, namespace: &str) -> Api<Build> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for KubeObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_build(&self, namespace: &str, name: &str) -> Result<Option<Build>, StoreError> {
        Ok(self.builds(namespace).get_opt(name).await?)
    }

    async fn patch_build(&self, namespace: &str, name: &str, patch: &Value) -> Result<Build, StoreError> {
        debug!("Patching Build {}/{}", namespace, name);
        Ok(self
            .builds(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_build_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<Build, StoreError> {
        debug!("Patching Build status {}/{}", namespace, name);
        Ok(self
            .builds(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn get_crd_metadata(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(crds.get_metadata_opt(name).await?.map(|partial| partial.metadata))
    }

    async fn get_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.dynamic(gvk, namespace).get_opt(name).await?)
    }

    async fn list_objects(&self, gvk: &GroupVersionKind, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError> {
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(self.dynamic(gvk, namespace).list(&params).await?.items)
    }

    async fn patch_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str, patch: &Value) -> Result<DynamicObject, StoreError> {
        debug!("Patching {} {}/{}", gvk.kind, namespace, name);
        Ok(self
            .dynamic(gvk, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!("Deleting {} {}/{}", gvk.kind, namespace, name);
        self.dynamic(gvk, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs(namespace).get_opt(name).await?)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let namespace = job
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| StoreError::InvalidRequest("Job has no namespace".to_string()))?;
        Ok(self.jobs(namespace).create(&PostParams::default(), job).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!("Deleting Job {}/{}", namespace, name);
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>, StoreError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(pods.list(&params).await?.items)
    }
}
