//! Phase and Ready summary projection.
//!
//! The phase is recomputed from status on every pass rather than stepped
//! through a transition table. Checks run in a fixed order and each one
//! overrides the previous, so a ready Build reports Completed even while
//! it is being deleted or before its provisioners ran.

use super::{status_mut, Reconciler};
use crate::conditions;
use crate::error::ControllerError;
use crds::{Build, BuildPhase, INFRASTRUCTURE_READY_CONDITION, PROVISIONERS_READY_CONDITION};
use kube::ResourceExt;
use kube_runtime::events::EventType;
use tracing::info;

/// Conditions summarized into Ready
pub const SUMMARY_INPUTS: [&str; 2] = [INFRASTRUCTURE_READY_CONDITION, PROVISIONERS_READY_CONDITION];

/// Phase implied by the Build's current status.
pub fn derive_phase(build: &Build) -> BuildPhase {
    let Some(status) = build.status.as_ref() else {
        return BuildPhase::Pending;
    };
    let Some(mut phase) = status.phase else {
        return BuildPhase::Pending;
    };

    if (build.spec.infrastructure_ref.is_some()
        && conditions::has(&status.conditions, INFRASTRUCTURE_READY_CONDITION))
        || status.infrastructure_ready
    {
        phase = BuildPhase::Building;
    }
    if status.failure_reason.is_some() || status.failure_message.is_some() {
        phase = BuildPhase::Failed;
    }
    if build.is_deleting() {
        phase = BuildPhase::Terminating;
    }
    if status.ready {
        phase = BuildPhase::Completed;
    }
    phase
}

impl Reconciler {
    /// Recomputes Ready and the phase, emitting an event when the phase
    /// differs from the one `before` was read with.
    pub(crate) async fn project_status(&self, before: &Build, build: &mut Build) -> Result<(), ControllerError> {
        conditions::set_summary(&mut status_mut(build).conditions, &SUMMARY_INPUTS);

        let phase = derive_phase(build);
        let previous = before.status.as_ref().and_then(|status| status.phase);
        status_mut(build).phase = Some(phase);
        if previous == Some(phase) {
            return Ok(());
        }

        info!("Build {} is {}", build.key(), phase);
        let name = build.name_any();
        if phase == BuildPhase::Failed {
            let message = build
                .status
                .as_ref()
                .and_then(|status| status.failure_message.clone())
                .unwrap_or_else(|| "unknown".to_string());
            self.events
                .publish(build, EventType::Warning, &phase.to_string(), format!("Build {name} is {phase}: {message}"))
                .await;
        } else {
            self.events
                .publish(build, EventType::Normal, &phase.to_string(), format!("Build {name} is {phase}"))
                .await;
        }
        Ok(())
    }
}
