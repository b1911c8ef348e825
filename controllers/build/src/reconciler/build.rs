//! Build reconcile entry point.
//!
//! One pass reads the Build, mutates a copy in memory and writes the
//! difference back at the end. Status lives behind the status subresource,
//! so a pass sends up to two merge patches instead of one: first status,
//! then finalizers and spec. Both are pinned to the resourceVersion they
//! were computed against, so a concurrent writer turns into a `Conflict`
//! error and a retried pass instead of a lost update.
//!
//! A spec patch written by the pass itself bumps `metadata.generation`.
//! When that happens a third patch moves `status.observedGeneration` along,
//! otherwise the next pass would read the bump as a user change and lift a
//! recorded failure.

use super::{lowest_non_zero, status_mut, Reconciler};
use crate::error::ControllerError;
use crds::{Build, BUILD_FINALIZER};
use kube::ResourceExt;
use kube_store::{merge_diff, with_resource_version};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Forward pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Link and mirror the infrastructure object
    Infrastructure,
    /// Establish a transport session
    Connection,
    /// Run the provisioner steps
    Provisioners,
    /// Produce the image
    ImageExport,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Infrastructure => "infrastructure",
            Self::Connection => "connection",
            Self::Provisioners => "provisioners",
            Self::ImageExport => "image-export",
        };
        f.write_str(s)
    }
}

/// All phases, in order
pub const PIPELINE: [Phase; 4] = [
    Phase::Infrastructure,
    Phase::Connection,
    Phase::Provisioners,
    Phase::ImageExport,
];

fn status_doc(build: &Build) -> Result<Value, ControllerError> {
    Ok(json!({ "status": serde_json::to_value(&build.status)? }))
}

fn main_doc(build: &Build) -> Result<Value, ControllerError> {
    Ok(json!({
        "metadata": { "finalizers": build.metadata.finalizers },
        "spec": serde_json::to_value(&build.spec)?,
    }))
}

/// Merges the pass result with the result of its final write.
fn finish(
    result: Result<Option<Duration>, ControllerError>,
    written: Result<(), ControllerError>,
) -> Result<Option<Duration>, ControllerError> {
    match (result, written) {
        (Ok(requeue), Ok(())) => Ok(requeue),
        (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
        (Err(pass), Err(write)) => Err(ControllerError::Aggregate(vec![pass, write])),
    }
}

impl Reconciler {
    /// Reconciles the Build `namespace/name`.
    ///
    /// Returns the delay after which the Build should be looked at again,
    /// if any.
    pub async fn reconcile_build(&self, namespace: &str, name: &str) -> Result<Option<Duration>, ControllerError> {
        let Some(before) = self.store.get_build(namespace, name).await? else {
            debug!("Build {}/{} not found", namespace, name);
            return Ok(None);
        };
        if before.is_paused() {
            info!("Build {} is paused", before.key());
            return Ok(None);
        }

        let mut build = before.clone();

        if build.is_deleting() {
            if !build.has_finalizer() {
                return Ok(None);
            }
            let result = self.reconcile_delete(&mut build).await;
            let written = self.finish_pass(&before, &mut build).await;
            return finish(result, written);
        }

        if !build.has_finalizer() {
            build.finalizers_mut().push(BUILD_FINALIZER.to_string());
            self.write_build(&before, &build).await?;
            info!("Added finalizer to Build {}", build.key());
            return Ok(None);
        }

        let result = self.reconcile_forward(&mut build).await;
        let written = self.finish_pass(&before, &mut build).await;
        finish(result, written)
    }

    async fn finish_pass(&self, before: &Build, build: &mut Build) -> Result<(), ControllerError> {
        self.project_status(before, build).await?;
        self.write_build(before, build).await
    }

    /// Runs every forward phase, unless a failure recorded for the current
    /// generation stops forward progress.
    async fn reconcile_forward(&self, build: &mut Build) -> Result<Option<Duration>, ControllerError> {
        let generation = build.metadata.generation;
        let status = status_mut(build);
        if status.failure_reason.is_some() || status.failure_message.is_some() {
            let stale = matches!(
                (status.observed_generation, generation),
                (Some(observed), Some(current)) if current > observed
            );
            if !stale {
                debug!("Build {} has failed, skipping forward phases", build.key());
                return Ok(None);
            }
            info!("Build {} spec changed, clearing failure", build.key());
            let status = status_mut(build);
            status.failure_reason = None;
            status.failure_message = None;
        }

        let mut requeue = None;
        let mut errors = Vec::new();
        for phase in PIPELINE {
            let result = match phase {
                Phase::Infrastructure => self.reconcile_infrastructure(build).await,
                Phase::Connection => self.reconcile_connection(build).await,
                Phase::Provisioners => self.reconcile_provisioners(build).await,
                Phase::ImageExport => self.reconcile_image_export(build).await,
            };
            match result {
                Ok(next) => requeue = lowest_non_zero(requeue, next),
                Err(e) => {
                    warn!("Build {} {} phase failed: {}", build.key(), phase, e);
                    errors.push(e);
                }
            }
        }
        status_mut(build).observed_generation = generation;

        match ControllerError::combine(errors) {
            Some(e) => Err(e),
            None => Ok(requeue),
        }
    }

    /// Writes the difference between `before` and `after`: status first,
    /// then finalizers and spec. Nothing is sent when nothing changed.
    pub(crate) async fn write_build(&self, before: &Build, after: &Build) -> Result<(), ControllerError> {
        let namespace = before.namespace().unwrap_or_default();
        let name = before.name_any();
        let mut resource_version = before.resource_version();

        if let Some(patch) = merge_diff(&status_doc(before)?, &status_doc(after)?) {
            debug!("Patching status of Build {}/{}", namespace, name);
            let patch = with_resource_version(patch, resource_version.as_deref());
            let updated = self.store.patch_build_status(&namespace, &name, &patch).await?;
            resource_version = updated.resource_version();
        }

        if let Some(patch) = merge_diff(&main_doc(before)?, &main_doc(after)?) {
            debug!("Patching Build {}/{}", namespace, name);
            let patch = with_resource_version(patch, resource_version.as_deref());
            let updated = self.store.patch_build(&namespace, &name, &patch).await?;
            self.observe_own_generation(before, after, &updated).await?;
        }
        Ok(())
    }

    /// Advances `observedGeneration` past a generation bump caused by this
    /// pass's own spec patch.
    async fn observe_own_generation(&self, before: &Build, after: &Build, updated: &Build) -> Result<(), ControllerError> {
        let observed = after.status.as_ref().and_then(|status| status.observed_generation);
        let (Some(observed), Some(generation)) = (observed, updated.metadata.generation) else {
            return Ok(());
        };
        if before.metadata.generation != Some(observed) || generation <= observed {
            return Ok(());
        }

        debug!("Build {} spec written by controller, observing generation {}", before.key(), generation);
        let patch = with_resource_version(
            json!({ "status": { "observedGeneration": generation } }),
            updated.resource_version().as_deref(),
        );
        self.store
            .patch_build_status(&before.namespace().unwrap_or_default(), &before.name_any(), &patch)
            .await?;
        Ok(())
    }
}
