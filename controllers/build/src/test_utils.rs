//! Shared test fixtures: recording collaborators and object builders.

use crate::backoff::{RetryPolicy, RetryTracker};
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::job::{job_name, ShellSettings};
use crate::reconciler::Reconciler;
use crate::tracker::KindWatcher;
use crds::{
    Build, BuildSpec, ConnectorSpec, LocalObjectReference, ObjectReference, ProvisionerKind,
    ProvisionerSpec, BUILD_FINALIZER,
    BUILD_NAMESPACE_LABEL, BUILD_NAME_LABEL, CONTRACT_LABEL, PROVISIONER_ID_LABEL,
};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use kube_runtime::events::EventType;
use kube_store::MockObjectStore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// An event captured by `RecordingEventPublisher`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub build: String,
    pub event_type: EventType,
    pub reason: String,
    pub note: String,
}

/// Keeps published events in memory
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, build: &Build, event_type: EventType, reason: &str, note: String) {
        self.events.lock().unwrap().push(RecordedEvent {
            build: build.key(),
            event_type,
            reason: reason.to_string(),
            note,
        });
    }
}

/// Records which kinds were asked to be watched
#[derive(Debug, Default)]
pub struct RecordingKindWatcher {
    started: Mutex<Vec<GroupVersionKind>>,
    fail: bool,
}

impl RecordingKindWatcher {
    /// A watcher whose every start fails
    pub fn failing() -> Self {
        Self {
            started: Mutex::default(),
            fail: true,
        }
    }

    pub fn started(&self) -> Vec<GroupVersionKind> {
        self.started.lock().unwrap().clone()
    }
}

impl KindWatcher for RecordingKindWatcher {
    fn start(&self, gvk: &GroupVersionKind) -> Result<(), ControllerError> {
        if self.fail {
            return Err(ControllerError::Watch(format!("cannot watch {}", gvk.kind)));
        }
        self.started.lock().unwrap().push(gvk.clone());
        Ok(())
    }
}

/// A reconciler over a mock store, with its recording collaborators
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub events: Arc<RecordingEventPublisher>,
    pub kinds: Arc<RecordingKindWatcher>,
}

impl TestHarness {
    pub fn new(store: &MockObjectStore) -> Self {
        let events = Arc::new(RecordingEventPublisher::default());
        let kinds = Arc::new(RecordingKindWatcher::default());
        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            events.clone(),
            kinds.clone(),
            RetryTracker::new(RetryPolicy::default()),
            ShellSettings::default(),
        );
        Self { reconciler, events, kinds }
    }
}

pub fn test_time() -> Time {
    serde_json::from_value(json!("2024-01-01T00:00:00Z")).unwrap()
}

pub fn infra_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("infrastructure.forge.build", "v1alpha1", "TestInfra")
}

/// Registers the TestInfra CRD declaring `versions` as compatible
pub fn add_infra_crd(store: &MockObjectStore, versions: &str) {
    store.add_crd(
        "testinfras.infrastructure.forge.build",
        BTreeMap::from([(CONTRACT_LABEL.to_string(), versions.to_string())]),
    );
}

/// A TestInfra object in "default" with the given status
pub fn infra_object(name: &str, status: Value) -> DynamicObject {
    let mut object = DynamicObject::new(name, &ApiResource::from_gvk(&infra_gvk())).within("default");
    object.data = json!({ "status": status });
    object
}

pub fn step_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("provisioner.forge.build", "v1alpha1", "TestStep")
}

/// A TestStep object in "default"
pub fn step_object(name: &str) -> DynamicObject {
    DynamicObject::new(name, &ApiResource::from_gvk(&step_gvk())).within("default")
}

/// An external provisioner step referencing TestStep `name`
pub fn external_step(name: &str) -> ProvisionerSpec {
    ProvisionerSpec {
        kind: ProvisionerKind::External,
        run: None,
        reference: Some(ObjectReference::new("provisioner.forge.build/v1alpha1", "TestStep", name)),
        ..ProvisionerSpec::shell("")
    }
}

/// Marks `object` as owned by and belonging to `build`
pub fn owned_by(mut object: DynamicObject, build: &Build) -> DynamicObject {
    object.metadata.owner_references = Some(vec![build.controller_owner_ref(&()).unwrap()]);
    object
        .labels_mut()
        .insert(BUILD_NAME_LABEL.to_string(), build.name_any());
    object
}

/// A Build in "default" with the uid the mock store would assign
pub fn test_build(name: &str) -> Build {
    let mut build = Build::new(name, BuildSpec::default());
    build.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        uid: Some(format!("uid-default-{name}")),
        generation: Some(1),
        ..Default::default()
    };
    build
}

/// A Build referencing TestInfra `infra`
pub fn build_with_infra(name: &str, infra: &str) -> Build {
    let mut build = test_build(name);
    build.spec.infrastructure_ref = Some(ObjectReference::new(
        "infrastructure.forge.build/v1alpha1",
        "TestInfra",
        infra,
    ));
    build
}

pub fn with_finalizer(mut build: Build) -> Build {
    build.metadata.finalizers = Some(vec![BUILD_FINALIZER.to_string()]);
    build
}

pub fn with_credentials(mut build: Build, secret: &str) -> Build {
    build.spec.connector = Some(ConnectorSpec {
        type_: "ssh".to_string(),
        credentials: Some(LocalObjectReference {
            name: secret.to_string(),
        }),
    });
    build
}

/// A provisioner Job for step `uuid` of `default/build` carrying one
/// condition of `condition_type`
pub fn finished_job(build: &str, uuid: &str, condition_type: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(job_name(uuid)),
            namespace: Some("forge-core".to_string()),
            uid: Some(format!("uid-job-{}", job_name(uuid))),
            labels: Some(BTreeMap::from([
                (BUILD_NAME_LABEL.to_string(), build.to_string()),
                (BUILD_NAMESPACE_LABEL.to_string(), "default".to_string()),
                (PROVISIONER_ID_LABEL.to_string(), uuid.to_string()),
            ])),
            ..Default::default()
        },
        spec: None,
        status: Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: condition_type.to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// A Pod of the Job with `job_uid` whose only container terminated
pub fn terminated_pod(job_uid: &str, label: &str, exit_code: i32, reason: &str, message: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("pod-{job_uid}")),
            namespace: Some("forge-core".to_string()),
            labels: Some(BTreeMap::from([(label.to_string(), job_uid.to_string())])),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: "shell-provisioner".to_string(),
                state: Some(ContainerState {
                    terminated: Some(ContainerStateTerminated {
                        exit_code,
                        reason: Some(reason.to_string()),
                        message: Some(message.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}
