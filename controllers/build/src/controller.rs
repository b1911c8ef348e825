//! Main controller implementation.
//!
//! Wires the Kubernetes client, the reconciler and the watchers together
//! and runs them until a watcher stops.

use crate::backoff::RetryTracker;
use crate::config::Settings;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::job::SHELL_PROVISIONER_NAME;
use crate::reconciler::Reconciler;
use crate::watcher::{self, DynamicKindWatcher};
use crds::{Build, MANAGED_BY_LABEL, WATCH_FILTER_LABEL};
use futures::channel::mpsc;
use k8s_openapi::api::batch::v1::Job;
use kube::{Api, Client};
use kube_runtime::watcher::Config as WatcherConfig;
use kube_store::KubeObjectStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Name the controller reports events as
pub const CONTROLLER_NAME: &str = "build-controller";

/// Main controller for Builds.
pub struct Controller {
    build_watcher: JoinHandle<Result<(), ControllerError>>,
    job_watcher: JoinHandle<Result<(), ControllerError>>,
    kinds: Arc<DynamicKindWatcher>,
}

impl Controller {
    /// Creates the controller and starts its watchers.
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing Build Controller");

        let client = Client::try_default().await?;

        let (triggers, trigger_stream) = mpsc::unbounded();
        let kinds = Arc::new(DynamicKindWatcher::new(
            client.clone(),
            settings.watch_namespace.clone(),
            triggers,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeObjectStore::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
            kinds.clone(),
            RetryTracker::new(settings.retry),
            settings.shell.clone(),
        ));

        let builds: Api<Build> = match &settings.watch_namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let mut build_config = WatcherConfig::default();
        if let Some(filter) = &settings.worker_name {
            build_config = build_config.labels(&format!("{WATCH_FILTER_LABEL}={filter}"));
        }
        let jobs: Api<Job> = Api::namespaced(client, &settings.shell.namespace);
        let job_config = WatcherConfig::default().labels(&format!("{MANAGED_BY_LABEL}={SHELL_PROVISIONER_NAME}"));

        let concurrency = settings.worker_concurrency;
        let build_watcher = tokio::spawn(watcher::watch_builds(
            builds,
            build_config,
            concurrency,
            trigger_stream,
            reconciler.clone(),
        ));
        let job_watcher = tokio::spawn(watcher::watch_jobs(jobs, job_config, concurrency, reconciler));

        Ok(Self {
            build_watcher,
            job_watcher,
            kinds,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Build Controller running");

        let result = tokio::select! {
            result = &mut self.build_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Build watcher panicked: {}", e)))?
            }
            result = &mut self.job_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Job watcher panicked: {}", e)))?
            }
        };

        self.kinds.shutdown();
        self.build_watcher.abort();
        self.job_watcher.abort();
        info!("Build Controller stopped");
        result
    }
}
