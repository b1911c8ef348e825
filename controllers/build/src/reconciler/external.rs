//! Generic linkage between a Build and a referenced, schema-unknown object.
//!
//! The referenced object is handled as an untyped `DynamicObject`. Only a
//! few conventional fields are read from it: `status.ready`,
//! `status.machineReady`, `status.failureReason`, `status.failureMessage`,
//! `status.failureDomains` and a Ready condition.

use super::{status_mut, Reconciler, MISSING_REFERENCE_REQUEUE};
use crate::error::ControllerError;
use crate::unstructured::nested_string;
use crate::version::latest_compatible;
use crds::{has_paused_annotation, label_value, Build, ObjectReference, BUILD_NAME_LABEL, CONTRACT_LABEL};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use kube_store::{merge_diff, with_resource_version};
use std::time::Duration;
use tracing::{debug, info};

/// Result of reconciling a reference
#[derive(Debug)]
pub enum ExternalOutcome {
    /// Object fetched, owned and labelled
    Found(DynamicObject),
    /// Build or object is paused; nothing was mutated
    Paused,
    /// Object does not exist yet; check again after the delay
    Missing(Duration),
}

/// Group-version-kind addressed by a reference
pub fn gvk_of(reference: &ObjectReference) -> GroupVersionKind {
    GroupVersionKind::gvk(reference.group(), reference.version(), &reference.kind)
}

/// Name of the CRD registering `gvk`, e.g. `testinfras.infrastructure.forge.build`
pub fn crd_name(gvk: &GroupVersionKind) -> String {
    format!("{}.{}", ApiResource::from_gvk(gvk).plural, gvk.group)
}

/// Namespace of the referent, defaulting to the Build's
pub fn reference_namespace(reference: &ObjectReference, build: &Build) -> String {
    reference
        .namespace
        .clone()
        .or_else(|| build.namespace())
        .unwrap_or_default()
}

impl Reconciler {
    /// Rewrites the reference's version to the newest version the provider
    /// declares compatible with this API contract.
    pub(crate) async fn resolve_contract_version(
        &self,
        reference: &mut ObjectReference,
    ) -> Result<(), ControllerError> {
        let crd = crd_name(&gvk_of(reference));
        let meta = self
            .store
            .get_crd_metadata(&crd)
            .await?
            .ok_or_else(|| ControllerError::InvalidReference(format!("CRD {crd} not found")))?;

        let latest = label_value(&meta, CONTRACT_LABEL)
            .and_then(latest_compatible)
            .ok_or_else(|| ControllerError::MissingContract {
                crd: crd.clone(),
                label: CONTRACT_LABEL.to_string(),
            })?;

        if latest != reference.version() {
            debug!("Resolved {} to version {} (was {})", crd, latest, reference.version());
            reference.set_version(latest);
        }
        Ok(())
    }

    /// Fetches the referenced object, watches its kind, takes ownership of
    /// it and copies its failure fields onto the Build.
    ///
    /// `reference` may have its version rewritten; callers store it back.
    pub(crate) async fn reconcile_external(
        &self,
        build: &mut Build,
        reference: &mut ObjectReference,
    ) -> Result<ExternalOutcome, ControllerError> {
        self.resolve_contract_version(reference).await?;
        let gvk = gvk_of(reference);
        let namespace = reference_namespace(reference, build);

        let Some(object) = self.store.get_object(&gvk, &namespace, &reference.name).await? else {
            info!(
                "Could not find {} {}/{} referenced by Build {}, requeuing",
                gvk.kind, namespace, reference.name, build.key()
            );
            return Ok(ExternalOutcome::Missing(MISSING_REFERENCE_REQUEUE));
        };

        self.tracker.watch(&gvk)?;

        if build.is_paused() || has_paused_annotation(&object.metadata) {
            info!("{} {}/{} or its Build is paused", gvk.kind, namespace, reference.name);
            return Ok(ExternalOutcome::Paused);
        }

        let object = self.adopt(build, &gvk, object).await?;

        if let Some(reason) = nested_string(&object.data, &["status", "failureReason"])? {
            status_mut(build).failure_reason = Some(reason);
        }
        if let Some(message) = nested_string(&object.data, &["status", "failureMessage"])? {
            status_mut(build).failure_message = Some(format!(
                "Failure detected from referenced resource {}, Kind={} with name \"{}\": {}",
                reference.api_version, gvk.kind, reference.name, message
            ));
        }

        Ok(ExternalOutcome::Found(object))
    }

    /// Sets the Build as controller owner and adds the build-name label,
    /// patching only when something changed.
    async fn adopt(
        &self,
        build: &Build,
        gvk: &GroupVersionKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, ControllerError> {
        let owner = build
            .controller_owner_ref(&())
            .ok_or_else(|| ControllerError::InvalidReference(format!("Build {} has no uid", build.key())))?;

        let mut updated = object.clone();
        let owners = updated.metadata.owner_references.get_or_insert_with(Vec::new);
        if let Some(other) = owners
            .iter()
            .find(|r| r.controller == Some(true) && r.uid != owner.uid)
        {
            return Err(ControllerError::AlreadyOwned(format!(
                "{} {} (controller {} {})",
                gvk.kind,
                object.name_any(),
                other.kind,
                other.name
            )));
        }
        match owners.iter_mut().find(|r| r.uid == owner.uid) {
            Some(existing) => *existing = owner,
            None => owners.push(owner),
        }
        updated
            .labels_mut()
            .insert(BUILD_NAME_LABEL.to_string(), build.name_any());

        let before = serde_json::to_value(&object)?;
        let after = serde_json::to_value(&updated)?;
        let Some(patch) = merge_diff(&before, &after) else {
            return Ok(object);
        };

        let namespace = object.namespace().unwrap_or_default();
        let patch = with_resource_version(patch, object.metadata.resource_version.as_deref());
        debug!("Adopting {} {}/{} for Build {}", gvk.kind, namespace, object.name_any(), build.key());
        Ok(self
            .store
            .patch_object(gvk, &namespace, &object.name_any(), &patch)
            .await?)
    }
}
