//! Kubernetes object references used by Build specs
//!
//! The infrastructure and external provisioner references point at resources
//! whose schema is owned by a provider, so they carry a full `apiVersion`
//! (group and version) rather than just an API group.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an externally-typed resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent, e.g. "infrastructure.forge.build/v1alpha1"
    pub api_version: String,

    /// Kind of the referent, e.g. "GCPBuild"
    pub kind: String,

    /// Name of the referent
    pub name: String,

    /// Namespace of the referent (defaults to the Build's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Create a reference in the same namespace as the referencing resource
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// API group of the referent. The core group is the empty string.
    pub fn group(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// Version part of `apiVersion`.
    pub fn version(&self) -> &str {
        match self.api_version.rsplit_once('/') {
            Some((_, version)) => version,
            None => &self.api_version,
        }
    }

    /// Replace the version, keeping the group.
    pub fn set_version(&mut self, version: &str) {
        let group = self.group();
        self.api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };
    }
}

/// Reference to a Secret or ConfigMap in the same namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Name of the referent
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_and_version_split() {
        let reference = ObjectReference::new("infrastructure.forge.build/v1alpha1", "TestInfra", "x");
        assert_eq!(reference.group(), "infrastructure.forge.build");
        assert_eq!(reference.version(), "v1alpha1");
    }

    #[test]
    fn test_core_group_reference() {
        let mut reference = ObjectReference::new("v1", "ConfigMap", "scripts");
        assert_eq!(reference.group(), "");
        assert_eq!(reference.version(), "v1");
        reference.set_version("v2");
        assert_eq!(reference.api_version, "v2");
    }

    #[test]
    fn test_set_version_keeps_group() {
        let mut reference = ObjectReference::new("infrastructure.forge.build/v1alpha1", "TestInfra", "x");
        reference.set_version("v1beta1");
        assert_eq!(reference.api_version, "infrastructure.forge.build/v1beta1");
    }
}
