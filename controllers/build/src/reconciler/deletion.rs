//! Finalizer-gated cascading deletion.
//!
//! The finalizer stays on the Build until every descendant is gone and the
//! infrastructure object is confirmed absent. Progress is made one step
//! per pass; the pass is re-run after `DELETION_REQUEUE` or when a watched
//! descendant changes.

use super::external::{gvk_of, reference_namespace};
use super::{status_mut, Reconciler, DELETION_REQUEUE};
use crate::conditions::{self, Fallback};
use crate::error::ControllerError;
use crds::{
    Build, ConditionSeverity, BUILD_FINALIZER, BUILD_NAME_LABEL, DELETED_REASON, DELETING_REASON,
    INFRASTRUCTURE_READY_CONDITION,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use kube_runtime::events::EventType;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// A descendant object and the kind it was listed as
#[derive(Debug, Clone)]
pub struct Descendant {
    /// Kind the object was listed as
    pub gvk: GroupVersionKind,
    /// The object
    pub object: DynamicObject,
}

impl Descendant {
    fn describe(&self) -> String {
        format!("{} {}", self.gvk.kind, self.object.name_any())
    }
}

/// The object's owner references include `build`.
pub fn is_owned_by(meta: &ObjectMeta, build: &Build) -> bool {
    let uid = build.uid();
    meta.owner_references.iter().flatten().any(|owner| {
        owner.kind == "Build"
            && owner.api_version.split('/').next() == Some("forge.build")
            && owner.name == build.name_any()
            && (uid.is_none() || uid.as_deref() == Some(owner.uid.as_str()))
    })
}

fn same_kind(a: &GroupVersionKind, b: &GroupVersionKind) -> bool {
    a.group == b.group && a.kind == b.kind
}

impl Reconciler {
    /// Objects labelled as belonging to the Build, across the infrastructure
    /// kind and every external provisioner kind. The infrastructure object
    /// itself is not included.
    pub(crate) async fn list_descendants(&self, build: &Build) -> Result<Vec<Descendant>, ControllerError> {
        let namespace = build.namespace().unwrap_or_default();
        let selector = BTreeMap::from([(BUILD_NAME_LABEL.to_string(), build.name_any())]);

        let infrastructure = build.spec.infrastructure_ref.as_ref();
        let mut kinds: Vec<GroupVersionKind> = Vec::new();
        let referenced = infrastructure
            .into_iter()
            .chain(build.spec.provisioners.iter().filter_map(|p| p.external_ref()));
        for reference in referenced {
            let gvk = gvk_of(reference);
            if !kinds.iter().any(|known| same_kind(known, &gvk)) {
                kinds.push(gvk);
            }
        }

        let mut descendants = Vec::new();
        for gvk in kinds {
            let objects = match self.store.list_objects(&gvk, &namespace, &selector).await {
                Ok(objects) => objects,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            for object in objects {
                let is_infrastructure = infrastructure.is_some_and(|reference| {
                    same_kind(&gvk_of(reference), &gvk) && reference.name == object.name_any()
                });
                if !is_infrastructure {
                    descendants.push(Descendant { gvk: gvk.clone(), object });
                }
            }
        }
        Ok(descendants)
    }

    /// One step of the deletion workflow. Removes the finalizer from
    /// `build` once nothing is left.
    pub(crate) async fn reconcile_delete(&self, build: &mut Build) -> Result<Option<Duration>, ControllerError> {
        let descendants = self.list_descendants(build).await?;
        if !descendants.is_empty() {
            let mut errors = Vec::new();
            for descendant in descendants.iter().filter(|d| is_owned_by(&d.object.metadata, build)) {
                if descendant.object.metadata.deletion_timestamp.is_some() {
                    continue;
                }
                info!("Deleting {} of Build {}", descendant.describe(), build.key());
                let namespace = descendant.object.namespace().unwrap_or_default();
                match self
                    .store
                    .delete_object(&descendant.gvk, &namespace, &descendant.object.name_any())
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => errors.push(ControllerError::from(e)),
                }
            }
            if let Some(e) = ControllerError::combine(errors) {
                return Err(e);
            }
            let names: Vec<String> = descendants.iter().map(Descendant::describe).collect();
            info!("Build {} still has descendants: {}", build.key(), names.join(", "));
            return Ok(Some(DELETION_REQUEUE));
        }

        if let Some(reference) = build.spec.infrastructure_ref.clone() {
            let gvk = gvk_of(&reference);
            let namespace = reference_namespace(&reference, build);
            match self.store.get_object(&gvk, &namespace, &reference.name).await? {
                None => conditions::mark_false(
                    &mut status_mut(build).conditions,
                    INFRASTRUCTURE_READY_CONDITION,
                    DELETED_REASON,
                    ConditionSeverity::Info,
                    "",
                ),
                Some(object) => {
                    self.tracker.watch(&gvk)?;
                    conditions::mirror(
                        &mut status_mut(build).conditions,
                        INFRASTRUCTURE_READY_CONDITION,
                        &object,
                        Fallback::info(false, DELETING_REASON),
                    )?;
                    if object.metadata.deletion_timestamp.is_none() {
                        info!("Deleting {} {} of Build {}", gvk.kind, reference.name, build.key());
                        match self.store.delete_object(&gvk, &namespace, &reference.name).await {
                            Ok(()) => {}
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e.into()),
                        }
                    } else {
                        debug!("{} {} of Build {} is terminating", gvk.kind, reference.name, build.key());
                    }
                    return Ok(None);
                }
            }
        }

        build.finalizers_mut().retain(|f| f != BUILD_FINALIZER);
        info!("Build {} has been deleted", build.key());
        let name = build.name_any();
        self.events
            .publish(build, EventType::Normal, "Deleted", format!("Build {name} has been deleted"))
            .await;
        Ok(None)
    }
}
