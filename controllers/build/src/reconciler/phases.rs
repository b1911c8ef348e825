//! Connection, provisioners and image-export phases.
//!
//! Each phase gates on the flag its predecessor sets, so running all of
//! them in one pass is safe even when an earlier one made no progress.

use super::{status_mut, Reconciler};
use crate::conditions;
use crate::error::ControllerError;
use crds::{
    Build, ConditionSeverity, BUILD_INITIALIZED_CONDITION, PROVISIONERS_READY_CONDITION,
    WAITING_FOR_CONNECTION_REASON, WAITING_FOR_PROVISIONERS_REASON,
};
use std::time::Duration;
use tracing::debug;

impl Reconciler {
    /// Waits for a transport session once the infrastructure is ready.
    pub(crate) async fn reconcile_connection(
        &self,
        build: &mut Build,
    ) -> Result<Option<Duration>, ControllerError> {
        let key = build.key();
        let status = status_mut(build);
        if !status.infrastructure_ready {
            debug!("Build {} infrastructure not ready, skipping connection", key);
            return Ok(None);
        }
        if status.connected {
            return Ok(None);
        }
        conditions::mark_false(
            &mut status.conditions,
            BUILD_INITIALIZED_CONDITION,
            WAITING_FOR_CONNECTION_REASON,
            ConditionSeverity::Info,
            "",
        );
        Ok(None)
    }

    /// Runs the provisioner steps once connected.
    pub(crate) async fn reconcile_provisioners(
        &self,
        build: &mut Build,
    ) -> Result<Option<Duration>, ControllerError> {
        let key = build.key();
        let status = status_mut(build);
        if !status.connected {
            debug!("Build {} not connected, skipping provisioners", key);
            return Ok(None);
        }
        if status.provisioners_ready {
            return Ok(None);
        }
        conditions::mark_false(
            &mut status.conditions,
            PROVISIONERS_READY_CONDITION,
            WAITING_FOR_PROVISIONERS_REASON,
            ConditionSeverity::Info,
            "",
        );
        self.run_provisioners(build).await
    }

    /// Marks the Build initialized once every provisioner finished.
    pub(crate) async fn reconcile_image_export(
        &self,
        build: &mut Build,
    ) -> Result<Option<Duration>, ControllerError> {
        let status = status_mut(build);
        if !status.provisioners_ready {
            return Ok(None);
        }
        conditions::mark_true(&mut status.conditions, BUILD_INITIALIZED_CONDITION);
        Ok(None)
    }
}
