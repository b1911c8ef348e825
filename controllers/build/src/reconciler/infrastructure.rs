//! Infrastructure phase.

use super::external::ExternalOutcome;
use super::{status_mut, Reconciler};
use crate::conditions::{self, Fallback};
use crate::error::ControllerError;
use crate::unstructured::{nested_bool, nested_field};
use crds::{
    Build, FailureDomainSpec, INFRASTRUCTURE_READY_CONDITION,
    WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON,
};
use kube::ResourceExt;
use kube_runtime::events::EventType;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

impl Reconciler {
    /// Links the Build to its infrastructure object and copies the
    /// provider's readiness, Ready condition and failure domains.
    pub(crate) async fn reconcile_infrastructure(
        &self,
        build: &mut Build,
    ) -> Result<Option<Duration>, ControllerError> {
        let Some(mut reference) = build.spec.infrastructure_ref.clone() else {
            return Ok(None);
        };
        let outcome = self.reconcile_external(build, &mut reference).await;
        build.spec.infrastructure_ref = Some(reference);

        let object = match outcome? {
            ExternalOutcome::Found(object) => object,
            ExternalOutcome::Paused => return Ok(None),
            ExternalOutcome::Missing(after) => return Ok(Some(after)),
        };

        let machine_ready = match nested_bool(&object.data, &["status", "machineReady"])? {
            Some(ready) => ready,
            None => nested_bool(&object.data, &["status", "ready"])?.unwrap_or(false),
        };
        let ready = nested_bool(&object.data, &["status", "ready"])?.unwrap_or(false);
        let failure_domains: BTreeMap<String, FailureDomainSpec> =
            match nested_field(&object.data, &["status", "failureDomains"]) {
                Some(domains) if !domains.is_null() => serde_json::from_value(domains.clone())?,
                _ => BTreeMap::new(),
            };

        let status = status_mut(build);
        let infrastructure_changed = status.infrastructure_ready != machine_ready;
        let ready_changed = status.ready != ready;
        status.infrastructure_ready = machine_ready;
        status.ready = ready;
        conditions::mirror(
            &mut status.conditions,
            INFRASTRUCTURE_READY_CONDITION,
            &object,
            Fallback::info(machine_ready, WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON),
        )?;
        status.failure_domains = failure_domains;

        let name = build.name_any();
        if infrastructure_changed {
            info!("Build {} InfrastructureReady is now {}", build.key(), machine_ready);
            self.events
                .publish(
                    build,
                    EventType::Normal,
                    "InfrastructureReady",
                    format!("Build {name} InfrastructureReady is now {machine_ready}"),
                )
                .await;
        }
        if ready_changed {
            info!("Build {} Ready is now {}", build.key(), ready);
            self.events
                .publish(build, EventType::Normal, "Ready", format!("Build {name} Ready is now {ready}"))
                .await;
        }

        Ok(None)
    }
}
