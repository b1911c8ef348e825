//! Reports finished provisioner Jobs back onto their Build.
//!
//! Triggered by Job watch events. A Job is matched to its Build and step
//! through the correlation labels; once the outcome is written onto the
//! step the Job is deleted.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{ProvisionerStatus, BUILD_NAME_LABEL, BUILD_NAMESPACE_LABEL, PROVISIONER_ID_LABEL};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Pod label carrying the owning Job's uid
pub const CONTROLLER_UID_LABEL: &str = "batch.kubernetes.io/controller-uid";

/// Pre-1.27 spelling of `CONTROLLER_UID_LABEL`
pub const LEGACY_CONTROLLER_UID_LABEL: &str = "controller-uid";

/// Terminal outcome of a Job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// `Complete=True`
    Complete,
    /// `Failed=True`
    Failed,
}

/// Terminal outcome from the Job's conditions, if it has one.
pub fn job_outcome(job: &Job) -> Option<JobOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    let is_true = |type_: &str| conditions.iter().any(|c| c.type_ == type_ && c.status == "True");
    if is_true("Complete") {
        Some(JobOutcome::Complete)
    } else if is_true("Failed") {
        Some(JobOutcome::Failed)
    } else {
        None
    }
}

/// Reason and message of the first container that exited non-zero,
/// init containers first.
pub fn failed_container(pod: &Pod) -> Option<(String, String)> {
    let status = pod.status.as_ref()?;
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .find_map(|container: &ContainerStatus| {
            let terminated = container.state.as_ref()?.terminated.as_ref()?;
            (terminated.exit_code != 0).then(|| {
                (
                    terminated.reason.clone().unwrap_or_default(),
                    terminated.message.clone().unwrap_or_default(),
                )
            })
        })
}

impl Reconciler {
    /// Records a finished Job on its provisioner step and deletes the Job.
    pub async fn reconcile_job(&self, job: &Job) -> Result<(), ControllerError> {
        let labels = job.labels();
        let (Some(build_name), Some(build_namespace), Some(uuid)) = (
            labels.get(BUILD_NAME_LABEL),
            labels.get(BUILD_NAMESPACE_LABEL),
            labels.get(PROVISIONER_ID_LABEL),
        ) else {
            debug!("Job {} has no correlation labels", job.name_any());
            return Ok(());
        };

        let has_conditions = job
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .is_some_and(|conditions| !conditions.is_empty());
        if !has_conditions {
            return Ok(());
        }
        let Some(outcome) = job_outcome(job) else {
            let types: Vec<String> = job
                .status
                .iter()
                .flat_map(|status| status.conditions.iter().flatten())
                .map(|c| format!("{}={}", c.type_, c.status))
                .collect();
            warn!("Job {} has unrecognized conditions [{}], ignoring", job.name_any(), types.join(", "));
            return Ok(());
        };

        let Some(before) = self.store.get_build(build_namespace, build_name).await? else {
            info!("Build {}/{} of Job {} is gone", build_namespace, build_name, job.name_any());
            return self.delete_job(job).await;
        };
        let mut build = before.clone();
        let Some(index) = build.provisioner_index(uuid) else {
            warn!("Build {} has no provisioner {}, deleting Job {}", build.key(), uuid, job.name_any());
            return self.delete_job(job).await;
        };

        if !build.spec.provisioners[index].current_status().is_terminal() {
            let step = &mut build.spec.provisioners[index];
            match outcome {
                JobOutcome::Complete => {
                    info!("Provisioner {} of Build {} completed", uuid, before.key());
                    step.status = Some(ProvisionerStatus::Completed);
                }
                JobOutcome::Failed => {
                    let failure = self.find_failure(job).await?;
                    match &failure {
                        Some((reason, message)) => {
                            info!("Provisioner {} of Build {} failed: {} {}", uuid, before.key(), reason, message);
                        }
                        None => info!("Provisioner {} of Build {} failed, Pod is gone", uuid, before.key()),
                    }
                    if let Some((reason, message)) = failure {
                        step.failure_reason = Some(reason);
                        step.failure_message = Some(message);
                    }
                    step.status = Some(ProvisionerStatus::Failed);
                }
            }
            self.write_build(&before, &build).await?;
        }

        self.delete_job(job).await
    }

    async fn find_failure(&self, job: &Job) -> Result<Option<(String, String)>, ControllerError> {
        let Some(uid) = job.uid() else {
            return Ok(None);
        };
        let namespace = job.namespace().unwrap_or_default();
        for label in [CONTROLLER_UID_LABEL, LEGACY_CONTROLLER_UID_LABEL] {
            let selector = BTreeMap::from([(label.to_string(), uid.clone())]);
            let pods = self.store.list_pods(&namespace, &selector).await?;
            if !pods.is_empty() {
                return Ok(pods.iter().find_map(failed_container));
            }
        }
        Ok(None)
    }

    async fn delete_job(&self, job: &Job) -> Result<(), ControllerError> {
        let namespace = job.namespace().unwrap_or_default();
        match self.store.delete_job(&namespace, &job.name_any()).await {
            Ok(()) => {
                debug!("Deleted Job {}/{}", namespace, job.name_any());
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
