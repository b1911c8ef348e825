//! Provisioner step execution.
//!
//! Steps run strictly in list order. A built-in shell step moves through
//! Unassigned -> Running -> Completed | Failed: the first pass assigns a
//! UUID and creates its Job, later passes poll the step status that the
//! Job observer writes back. External steps are adopted like any other
//! referenced object and polled the same way.

use super::external::ExternalOutcome;
use super::{status_mut, Reconciler, PROVISIONER_REQUEUE};
use crate::conditions;
use crate::error::ControllerError;
use crate::job::{ShellJobBuilder, Script};
use crds::{
    Build, BuildStatusError, ProvisionerKind, ProvisionerSpec, ProvisionerStatus,
    PROVISIONERS_READY_CONDITION,
};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Step finished in a way that lets the next one start.
fn step_done(step: &ProvisionerSpec) -> bool {
    match step.current_status() {
        ProvisionerStatus::Completed => true,
        ProvisionerStatus::Failed => step.allow_fail,
        _ => false,
    }
}

fn fail_build(build: &mut Build, reason: BuildStatusError, message: String) {
    warn!("Build {} failed: {}", build.key(), message);
    let status = status_mut(build);
    status.failure_reason = Some(reason.to_string());
    status.failure_message = Some(message);
}

impl Reconciler {
    /// Advances the first unfinished step; marks the Build's provisioners
    /// ready once every step is done.
    pub(crate) async fn run_provisioners(
        &self,
        build: &mut Build,
    ) -> Result<Option<Duration>, ControllerError> {
        for index in 0..build.spec.provisioners.len() {
            if step_done(&build.spec.provisioners[index]) {
                continue;
            }
            let requeue = match build.spec.provisioners[index].kind {
                ProvisionerKind::BuiltinShell => self.reconcile_shell_provisioner(build, index).await?,
                ProvisionerKind::External => self.reconcile_external_provisioner(build, index).await?,
            };
            if !step_done(&build.spec.provisioners[index]) {
                return Ok(requeue);
            }
        }

        info!("All provisioners of Build {} finished", build.key());
        let status = status_mut(build);
        status.provisioners_ready = true;
        conditions::mark_true(&mut status.conditions, PROVISIONERS_READY_CONDITION);
        Ok(None)
    }

    /// Creates the step's Job on first run, then polls its status.
    pub(crate) async fn reconcile_shell_provisioner(
        &self,
        build: &mut Build,
        index: usize,
    ) -> Result<Option<Duration>, ControllerError> {
        if build.spec.provisioners[index].uuid.is_none() {
            return self.start_shell_provisioner(build, index).await;
        }
        Ok(self.poll_provisioner(build, index))
    }

    async fn start_shell_provisioner(
        &self,
        build: &mut Build,
        index: usize,
    ) -> Result<Option<Duration>, ControllerError> {
        let credentials = build
            .spec
            .connector
            .as_ref()
            .and_then(|connector| connector.credentials.as_ref())
            .map(|secret| secret.name.clone());
        let Some(credentials) = credentials else {
            let message = format!("Provisioner {index} requires connector credentials");
            fail_build(build, BuildStatusError::InvalidConfiguration, message);
            return Ok(None);
        };

        let step = build.spec.provisioners[index].clone();
        let script = match (step.run, step.run_config_map_ref) {
            (Some(run), _) => Script::Inline(run),
            (None, Some(config_map)) => Script::ConfigMap(config_map.name),
            (None, None) => {
                let message = format!("Provisioner {index} has neither run nor runConfigMapRef");
                fail_build(build, BuildStatusError::InvalidConfiguration, message);
                return Ok(None);
            }
        };

        let uuid = Uuid::new_v4().to_string();
        let job = ShellJobBuilder::new(
            &self.shell,
            &build.name_any(),
            &build.namespace().unwrap_or_default(),
            &uuid,
        )
        .script(script)
        .credentials_secret(&credentials)
        .retries(step.retries)
        .build();
        self.apply_job(&job).await?;

        info!("Started provisioner {} of Build {} as Job {}", uuid, build.key(), job.name_any());
        let step = &mut build.spec.provisioners[index];
        step.uuid = Some(uuid);
        step.status = Some(ProvisionerStatus::Running);
        Ok(Some(PROVISIONER_REQUEUE))
    }

    /// Creates the Job unless it already exists.
    async fn apply_job(&self, job: &Job) -> Result<(), ControllerError> {
        let namespace = job.namespace().unwrap_or_default();
        if self.store.get_job(&namespace, &job.name_any()).await?.is_some() {
            debug!("Job {}/{} already exists", namespace, job.name_any());
            return Ok(());
        }
        match self.store.create_job(job).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn reconcile_external_provisioner(
        &self,
        build: &mut Build,
        index: usize,
    ) -> Result<Option<Duration>, ControllerError> {
        let Some(mut reference) = build.spec.provisioners[index].reference.clone() else {
            let message = format!("External provisioner {index} has no ref");
            fail_build(build, BuildStatusError::InvalidConfiguration, message);
            return Ok(None);
        };
        let outcome = self.reconcile_external(build, &mut reference).await;
        build.spec.provisioners[index].reference = Some(reference);

        match outcome? {
            ExternalOutcome::Found(_) => Ok(self.poll_provisioner(build, index)),
            ExternalOutcome::Paused => Ok(None),
            ExternalOutcome::Missing(after) => Ok(Some(after)),
        }
    }

    /// Maps the step status onto the Build. Only an unallowed failure has
    /// an effect: it fails the whole Build.
    pub(crate) fn poll_provisioner(&self, build: &mut Build, index: usize) -> Option<Duration> {
        let step = &build.spec.provisioners[index];
        match step.current_status() {
            ProvisionerStatus::Pending | ProvisionerStatus::Running => Some(PROVISIONER_REQUEUE),
            ProvisionerStatus::Unknown => {
                warn!("Provisioner {} of Build {} has an unrecognized status", index, build.key());
                None
            }
            ProvisionerStatus::Completed => None,
            ProvisionerStatus::Failed if step.allow_fail => {
                debug!("Provisioner {} of Build {} failed but is allowed to", index, build.key());
                None
            }
            ProvisionerStatus::Failed => {
                let message = format!(
                    "Provisioner {} failed with Reason {} and Message {}",
                    step.uuid.as_deref().unwrap_or_default(),
                    step.failure_reason.as_deref().unwrap_or_default(),
                    step.failure_message.as_deref().unwrap_or_default(),
                );
                fail_build(build, BuildStatusError::ProvisionerFailed, message);
                None
            }
        }
    }
}
