//! In-memory ObjectStore for unit testing
//!
//! Behaves like a single API server for the handful of semantics the
//! controller relies on:
//! - merge patches (RFC 7386), with `status` only writable through the
//!   status subresource
//! - `resourceVersion` bumped on every write, stale pinned patches rejected
//!   with `Conflict`
//! - `generation` bumped when a Build's spec changes
//! - deletion of an object with finalizers only sets `deletionTimestamp`;
//!   the object disappears once its last finalizer is removed
//!
//! Write counters let tests assert that an idempotent pass wrote nothing.

use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use crds::Build;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);
type ObjectKey = (String, String, String);

/// Counts of writes issued against the mock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    /// Build metadata/spec patches
    pub build_patches: u64,
    /// Build status patches
    pub status_patches: u64,
    /// Untyped object patches
    pub object_patches: u64,
    /// Untyped object deletes
    pub object_deletes: u64,
    /// Jobs created
    pub jobs_created: u64,
    /// Jobs deleted
    pub jobs_deleted: u64,
}

impl WriteCounts {
    /// Sum of all writes
    pub fn total(&self) -> u64 {
        self.build_patches
            + self.status_patches
            + self.object_patches
            + self.object_deletes
            + self.jobs_created
            + self.jobs_deleted
    }
}

/// Mock object store for testing
#[derive(Clone, Default)]
pub struct MockObjectStore {
    pub(crate) builds: Arc<Mutex<HashMap<Key, Build>>>,
    pub(crate) crds: Arc<Mutex<HashMap<String, ObjectMeta>>>,
    pub(crate) objects: Arc<Mutex<HashMap<ObjectKey, DynamicObject>>>,
    pub(crate) jobs: Arc<Mutex<HashMap<Key, Job>>>,
    pub(crate) pods: Arc<Mutex<HashMap<Key, Pod>>>,
    pub(crate) writes: Arc<Mutex<WriteCounts>>,
    pub(crate) failing_gets: Arc<Mutex<Option<String>>>,
    pub(crate) next_version: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}", gvk.group, gvk.kind)
}

fn deletion_now() -> Result<Time, StoreError> {
    Ok(serde_json::from_value(Value::String("2024-01-01T00:00:00Z".to_string()))?)
}

fn matches_labels(meta: &ObjectMeta, selector: &BTreeMap<String, String>) -> bool {
    let labels = meta.labels.clone().unwrap_or_default();
    selector.iter().all(|(key, value)| labels.get(key) == Some(value))
}

fn pinned_version(patch: &Value) -> Option<&str> {
    patch.get("metadata")?.get("resourceVersion")?.as_str()
}

fn check_version(meta: &ObjectMeta, patch: &Value, what: &str) -> Result<(), StoreError> {
    match pinned_version(patch) {
        Some(pinned) if meta.resource_version.as_deref() != Some(pinned) => Err(StoreError::Conflict(
            format!("{what}: resourceVersion {pinned} is stale"),
        )),
        _ => Ok(()),
    }
}

fn apply_merge<T: Serialize + DeserializeOwned>(object: &T, patch: &Value) -> Result<T, StoreError> {
    let mut doc = serde_json::to_value(object)?;
    json_patch::merge(&mut doc, patch);
    Ok(serde_json::from_value(doc)?)
}

impl MockObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, meta: &mut ObjectMeta) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        meta.resource_version = Some(version.to_string());
    }

    fn count(&self, update: impl FnOnce(&mut WriteCounts)) {
        update(&mut lock(&self.writes));
    }

    /// Snapshot of write counters
    pub fn writes(&self) -> WriteCounts {
        *lock(&self.writes)
    }

    /// Add or replace a Build. Namespace defaults to "default".
    pub fn add_build(&self, mut build: Build) {
        let namespace = build.metadata.namespace.get_or_insert_with(|| "default".to_string()).clone();
        let name = build.metadata.name.clone().unwrap_or_default();
        build.metadata.uid.get_or_insert_with(|| format!("uid-{namespace}-{name}"));
        build.metadata.generation.get_or_insert(1);
        self.bump(&mut build.metadata);
        lock(&self.builds).insert((namespace, name), build);
    }

    /// Current stored Build
    pub fn build(&self, namespace: &str, name: &str) -> Option<Build> {
        lock(&self.builds)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Marks a stored Build for deletion, as the API server does when a
    /// delete hits an object with finalizers.
    pub fn mark_build_deleted(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut builds = lock(&self.builds);
        let key = (namespace.to_string(), name.to_string());
        let build = builds
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("Build {namespace}/{name}")))?;
        if build.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            builds.remove(&key);
            return Ok(());
        }
        build.metadata.deletion_timestamp = Some(deletion_now()?);
        self.bump(&mut build.metadata);
        Ok(())
    }

    /// Register CRD metadata (labels carry the contract versions)
    pub fn add_crd(&self, name: &str, labels: BTreeMap<String, String>) {
        let meta = ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        };
        lock(&self.crds).insert(name.to_string(), meta);
    }

    /// Add or replace an untyped object
    pub fn add_object(&self, gvk: &GroupVersionKind, mut object: DynamicObject) {
        let namespace = object.metadata.namespace.get_or_insert_with(|| "default".to_string()).clone();
        let name = object.metadata.name.clone().unwrap_or_default();
        object.metadata.uid.get_or_insert_with(|| format!("uid-{}-{name}", gvk.kind));
        self.bump(&mut object.metadata);
        lock(&self.objects).insert((gvk_key(gvk), namespace, name), object);
    }

    /// Current stored untyped object
    pub fn object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        lock(&self.objects)
            .get(&(gvk_key(gvk), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Remove an untyped object outright (e.g. a finalizer elsewhere cleared)
    pub fn remove_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) {
        lock(&self.objects).remove(&(gvk_key(gvk), namespace.to_string(), name.to_string()));
    }

    /// Add or replace a Job
    pub fn add_job(&self, mut job: Job) {
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let name = job.metadata.name.clone().unwrap_or_default();
        job.metadata.uid.get_or_insert_with(|| format!("uid-job-{name}"));
        self.bump(&mut job.metadata);
        lock(&self.jobs).insert((namespace, name), job);
    }

    /// All stored Jobs
    pub fn jobs(&self) -> Vec<Job> {
        lock(&self.jobs).values().cloned().collect()
    }

    /// Add or replace a Pod
    pub fn add_pod(&self, pod: Pod) {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        lock(&self.pods).insert((namespace, name), pod);
    }

    /// Makes every subsequent `get_object` fail with a backend error
    pub fn fail_object_gets(&self, message: &str) {
        *lock(&self.failing_gets) = Some(message.to_string());
    }
}

impl std::fmt::Debug for MockObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockObjectStore")
            .field("writes", &self.writes())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    async fn get_build(&self, namespace: &str, name: &str) -> Result<Option<Build>, StoreError> {
        Ok(self.build(namespace, name))
    }

    async fn patch_build(&self, namespace: &str, name: &str, patch: &Value) -> Result<Build, StoreError> {
        let mut builds = lock(&self.builds);
        let key = (namespace.to_string(), name.to_string());
        let current = builds
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("Build {namespace}/{name}")))?;
        check_version(&current.metadata, patch, "Build")?;

        let mut patch = patch.clone();
        if let Value::Object(fields) = &mut patch {
            fields.remove("status");
        }
        let mut updated = apply_merge(current, &patch)?;
        if updated.spec != current.spec {
            updated.metadata.generation = Some(current.metadata.generation.unwrap_or(1) + 1);
        }
        self.bump(&mut updated.metadata);
        self.count(|w| w.build_patches += 1);

        if updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty)
        {
            builds.remove(&key);
        } else {
            builds.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn patch_build_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<Build, StoreError> {
        let mut builds = lock(&self.builds);
        let key = (namespace.to_string(), name.to_string());
        let current = builds
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("Build {namespace}/{name}")))?;
        check_version(&current.metadata, patch, "Build")?;

        let status_only = serde_json::json!({ "status": patch.get("status").cloned().unwrap_or(Value::Null) });
        let mut updated = apply_merge(current, &status_only)?;
        self.bump(&mut updated.metadata);
        self.count(|w| w.status_patches += 1);
        builds.insert(key, updated.clone());
        Ok(updated)
    }

    async fn get_crd_metadata(&self, name: &str) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(lock(&self.crds).get(name).cloned())
    }

    async fn get_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<Option<DynamicObject>, StoreError> {
        if let Some(message) = lock(&self.failing_gets).clone() {
            return Err(StoreError::InvalidRequest(message));
        }
        Ok(self.object(gvk, namespace, name))
    }

    async fn list_objects(&self, gvk: &GroupVersionKind, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError> {
        let kind = gvk_key(gvk);
        let mut found: Vec<DynamicObject> = lock(&self.objects)
            .iter()
            .filter(|((k, ns, _), obj)| *k == kind && ns == namespace && matches_labels(&obj.metadata, labels))
            .map(|(_, obj)| obj.clone())
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn patch_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str, patch: &Value) -> Result<DynamicObject, StoreError> {
        let mut objects = lock(&self.objects);
        let key = (gvk_key(gvk), namespace.to_string(), name.to_string());
        let current = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {namespace}/{name}", gvk.kind)))?;
        check_version(&current.metadata, patch, &gvk.kind)?;

        let mut updated = apply_merge(current, patch)?;
        self.bump(&mut updated.metadata);
        self.count(|w| w.object_patches += 1);
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut objects = lock(&self.objects);
        let key = (gvk_key(gvk), namespace.to_string(), name.to_string());
        let object = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {namespace}/{name}", gvk.kind)))?;
        self.count(|w| w.object_deletes += 1);
        if object.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            objects.remove(&key);
        } else if object.metadata.deletion_timestamp.is_none() {
            object.metadata.deletion_timestamp = Some(deletion_now()?);
            self.bump(&mut object.metadata);
        }
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, StoreError> {
        Ok(lock(&self.jobs)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let namespace = job
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| StoreError::InvalidRequest("Job has no namespace".to_string()))?;
        let name = job.metadata.name.clone().unwrap_or_default();
        let mut jobs = lock(&self.jobs);
        let key = (namespace, name.clone());
        if jobs.contains_key(&key) {
            return Err(StoreError::Conflict(format!("Job {name} already exists")));
        }
        let mut created = job.clone();
        created.metadata.uid = Some(format!("uid-job-{name}"));
        self.bump(&mut created.metadata);
        self.count(|w| w.jobs_created += 1);
        jobs.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let removed = lock(&self.jobs).remove(&(namespace.to_string(), name.to_string()));
        match removed {
            Some(_) => {
                self.count(|w| w.jobs_deleted += 1);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("Job {namespace}/{name}"))),
        }
    }

    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>, StoreError> {
        Ok(lock(&self.pods)
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_labels(&pod.metadata, labels))
            .map(|(_, pod)| pod.clone())
            .collect())
    }
}
