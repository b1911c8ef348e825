//! Well-known labels, annotations and finalizers

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Finalizer held on every Build until the deletion workflow completes
pub const BUILD_FINALIZER: &str = "build.forge.build";

/// Label set on descendants and Jobs naming the owning Build
pub const BUILD_NAME_LABEL: &str = "forge.build/build-name";

/// Label set on Jobs naming the owning Build's namespace
pub const BUILD_NAMESPACE_LABEL: &str = "forge.build/build-namespace";

/// Label set on Jobs carrying the provisioner UUID
pub const PROVISIONER_ID_LABEL: &str = "forge.build/provisioner-uuid";

/// Label identifying the component that manages a Job
pub const MANAGED_BY_LABEL: &str = "forge.build/managed-by";

/// Label used to shard Builds across controller instances
pub const WATCH_FILTER_LABEL: &str = "forge.build/watch-filter";

/// Presence of this annotation pauses reconciliation of the annotated object
pub const PAUSED_ANNOTATION: &str = "forge.build/paused";

/// Label key on provider CRDs listing the versions compatible with this API
/// contract, e.g. `forge.build/v1alpha1: v1alpha1_v1beta1`
pub const CONTRACT_LABEL: &str = "forge.build/v1alpha1";

/// Returns true when the object carries the pause annotation (any value)
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key(PAUSED_ANNOTATION))
}

/// Returns the value of a label, if set
pub fn label_value<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}
