//! Build CRD
//!
//! Declares a multi-step machine image build: infrastructure to provision,
//! how to connect to it, the ordered provisioning steps, and the resulting
//! image. Every status field is written by the controller.

use crate::condition::Condition;
use crate::labels::{has_paused_annotation, BUILD_FINALIZER};
use crate::provisioner::ProvisionerSpec;
use crate::references::{LocalObjectReference, ObjectReference};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "forge.build",
    version = "v1alpha1",
    kind = "Build",
    namespaced,
    status = "BuildStatus",
    shortname = "bld",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Stops reconciliation while true
    #[serde(default)]
    pub paused: bool,

    /// Transport used to reach the build machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorSpec>,

    /// Provider object that provisions the build machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Ordered provisioning steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioners: Vec<ProvisionerSpec>,

    /// Delete descendants together with the Build
    #[serde(default)]
    pub delete_cascade: bool,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    /// Transport type, e.g. "ssh"
    #[serde(rename = "type")]
    pub type_: String,

    /// Secret with username, password or privateKey, and host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<LocalObjectReference>,
}

/// Observed state of a Build
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    /// Failure domains reported by the infrastructure provider
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: BTreeMap<String, FailureDomainSpec>,

    /// Terminal failure reason; stops forward progress until the spec changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Human readable terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Conditions, Ready first then sorted by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Infrastructure provider reports the machine ready
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Transport session established
    #[serde(default)]
    pub connected: bool,

    /// Every provisioner step finished
    #[serde(default)]
    pub provisioners_ready: bool,

    /// Derived phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BuildPhase>,

    /// Infrastructure provider reports the build ready
    #[serde(default)]
    pub ready: bool,

    /// Generation of the spec the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// A failure domain offered by the infrastructure provider
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    /// Domain is usable for infrastructure placement
    #[serde(default)]
    pub control_plane: bool,

    /// Provider-specific attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Derived lifecycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum BuildPhase {
    /// Accepted, nothing provisioned yet
    Pending,
    /// Infrastructure being provisioned or steps running
    Building,
    /// Deletion in progress
    Terminating,
    /// Image produced
    Completed,
    /// Terminal failure
    Failed,
    /// Unrecognized stored value
    #[serde(other)]
    Unknown,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Building => "Building",
            Self::Terminating => "Terminating",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Terminal failure reasons written by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatusError {
    /// The spec cannot be acted on
    InvalidConfiguration,
    /// The spec changed in a way that is not supported
    UnsupportedChange,
    /// Creating a dependent resource failed
    CreateError,
    /// Updating a dependent resource failed
    UpdateError,
    /// Deleting a dependent resource failed
    DeleteError,
    /// A provisioner step failed and was not allowed to
    ProvisionerFailed,
}

impl BuildStatusError {
    /// Wire value written to `status.failureReason`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::UnsupportedChange => "UnsupportedChange",
            Self::CreateError => "CreateError",
            Self::UpdateError => "UpdateError",
            Self::DeleteError => "DeleteError",
            Self::ProvisionerFailed => "ProvisionerFailed",
        }
    }
}

impl fmt::Display for BuildStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Build {
    /// Paused by spec flag or annotation.
    pub fn is_paused(&self) -> bool {
        self.spec.paused || has_paused_annotation(&self.metadata)
    }

    /// Carries the controller finalizer.
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == BUILD_FINALIZER)
    }

    /// Has a deletion timestamp.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Status, or an empty one for Builds never reconciled.
    pub fn status_or_default(&self) -> BuildStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Index of the provisioner step with the given UUID.
    pub fn provisioner_index(&self, uuid: &str) -> Option<usize> {
        self.spec
            .provisioners
            .iter()
            .position(|p| p.uuid.as_deref() == Some(uuid))
    }

    /// `namespace/name` for logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::PAUSED_ANNOTATION;
    use serde_json::json;

    #[test]
    fn test_unknown_phase_string_maps_to_unknown() {
        let status: BuildStatus = serde_json::from_value(json!({"phase": "Exploded"})).unwrap();
        assert_eq!(status.phase, Some(BuildPhase::Unknown));
    }

    #[test]
    fn test_failure_domain_wire_names() {
        let status: BuildStatus = serde_json::from_value(json!({
            "failureDomains": {"zone-a": {"controlPlane": true, "attributes": {"region": "eu"}}}
        }))
        .unwrap();
        let domain = &status.failure_domains["zone-a"];
        assert!(domain.control_plane);
        assert_eq!(domain.attributes["region"], "eu");
    }

    #[test]
    fn test_paused_by_flag_or_annotation() {
        let mut build = Build::new("demo", BuildSpec::default());
        assert!(!build.is_paused());

        build.spec.paused = true;
        assert!(build.is_paused());

        build.spec.paused = false;
        build
            .annotations_mut()
            .insert(PAUSED_ANNOTATION.to_string(), "true".to_string());
        assert!(build.is_paused());
    }

    #[test]
    fn test_provisioner_index_by_uuid() {
        let mut build = Build::new("demo", BuildSpec::default());
        let mut step = ProvisionerSpec::shell("echo hi");
        step.uuid = Some("abc".to_string());
        build.spec.provisioners = vec![ProvisionerSpec::shell("true"), step];
        assert_eq!(build.provisioner_index("abc"), Some(1));
        assert_eq!(build.provisioner_index("nope"), None);
    }

    #[test]
    fn test_status_error_wire_values() {
        assert_eq!(BuildStatusError::ProvisionerFailed.to_string(), "ProvisionerFailed");
        assert_eq!(BuildStatusError::InvalidConfiguration.as_str(), "InvalidConfiguration");
    }
}
