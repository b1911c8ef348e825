//! Kubernetes resource watchers.
//!
//! Builds and provisioner Jobs are each driven by a
//! `kube_runtime::Controller`, which de-duplicates keys in flight, bounds
//! concurrency and re-queues on error. Referenced provider kinds are only
//! known at runtime, so `DynamicKindWatcher` starts one watch per kind on
//! demand and feeds the owning Builds back in as extra triggers.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::tracker::KindWatcher;
use crds::Build;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller, WatchStreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds that own `object` through an owner reference.
pub fn owning_builds(object: &DynamicObject) -> Vec<ObjectRef<Build>> {
    let namespace = object.namespace();
    object
        .owner_references()
        .iter()
        .filter(|owner| owner.kind == "Build" && owner.api_version.split('/').next() == Some("forge.build"))
        .map(|owner| {
            let build = ObjectRef::new(&owner.name);
            match &namespace {
                Some(ns) => build.within(ns),
                None => build,
            }
        })
        .collect()
}

/// Runs the Build controller until shutdown.
pub async fn watch_builds(
    api: Api<Build>,
    watcher_config: watcher::Config,
    concurrency: u16,
    triggers: UnboundedReceiver<ObjectRef<Build>>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!("Starting Build watcher");

    let reconcile = |build: Arc<Build>, ctx: Arc<Reconciler>| async move {
        let namespace = build.namespace().unwrap_or_default();
        let requeue = ctx.reconcile_build(&namespace, &build.name_any()).await?;
        ctx.retry.record_success(&build.key());
        Ok::<_, ControllerError>(requeue.map_or_else(Action::await_change, Action::requeue))
    };
    let error_policy = |build: Arc<Build>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let delay = ctx.retry.record_failure(&build.key());
        error!("Reconciliation of Build {} failed, retrying in {:?}: {}", build.key(), delay, error);
        Action::requeue(delay)
    };

    Controller::new(api, watcher_config)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((build, _)) => debug!("Reconciled Build {}", build),
                Err(e) => warn!("Build controller error: {}", e),
            }
        })
        .await;

    info!("Build watcher stopped");
    Ok(())
}

/// Runs the provisioner Job observer until shutdown.
pub async fn watch_jobs(
    api: Api<Job>,
    watcher_config: watcher::Config,
    concurrency: u16,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!("Starting provisioner Job watcher");

    let job_key = |job: &Job| format!("job/{}/{}", job.namespace().unwrap_or_default(), job.name_any());
    let reconcile = move |job: Arc<Job>, ctx: Arc<Reconciler>| async move {
        ctx.reconcile_job(&job).await?;
        ctx.retry.record_success(&job_key(&job));
        Ok::<_, ControllerError>(Action::await_change())
    };
    let error_policy = move |job: Arc<Job>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let delay = ctx.retry.record_failure(&job_key(&job));
        error!("Reconciliation of Job {} failed, retrying in {:?}: {}", job.name_any(), delay, error);
        Action::requeue(delay)
    };

    Controller::new(api, watcher_config)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!("Job controller error: {}", e);
            }
        })
        .await;

    info!("Provisioner Job watcher stopped");
    Ok(())
}

/// Starts a background watch per referenced kind and turns every change
/// of a Build-owned object into a Build trigger.
pub struct DynamicKindWatcher {
    client: Client,
    namespace: Option<String>,
    triggers: UnboundedSender<ObjectRef<Build>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DynamicKindWatcher {
    /// Creates a watcher sending Build triggers into `triggers`.
    pub fn new(client: Client, namespace: Option<String>, triggers: UnboundedSender<ObjectRef<Build>>) -> Self {
        Self {
            client,
            namespace,
            triggers,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Stops every watch started so far.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Stopping {} dynamic watches", tasks.len());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.triggers.close_channel();
    }
}

impl KindWatcher for DynamicKindWatcher {
    fn start(&self, gvk: &GroupVersionKind) -> Result<(), ControllerError> {
        let resource = ApiResource::from_gvk(gvk);
        let api: Api<DynamicObject> = match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };
        let triggers = self.triggers.clone();
        let kind = gvk.kind.clone();

        let task = tokio::spawn(async move {
            let mut objects = watcher(api, watcher::Config::default())
                .default_backoff()
                .touched_objects()
                .boxed();
            while let Some(event) = objects.next().await {
                match event {
                    Ok(object) => {
                        for build in owning_builds(&object) {
                            debug!("{} {} changed, triggering Build {}", kind, object.name_any(), build);
                            if triggers.unbounded_send(build).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("Watch on {} failed: {}", kind, e),
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
        Ok(())
    }
}
