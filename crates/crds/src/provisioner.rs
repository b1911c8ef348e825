//! Provisioner steps embedded in a Build spec

use crate::references::{LocalObjectReference, ObjectReference};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_retries() -> i32 {
    1
}

/// One ordered provisioning step
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerSpec {
    /// Identity of the step's execution, assigned on first run and never changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// How the step is executed
    #[serde(rename = "type")]
    pub kind: ProvisionerKind,

    /// A failure of this step does not fail the Build
    #[serde(default)]
    pub allow_fail: bool,

    /// Inline script to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// ConfigMap holding the script to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_config_map_ref: Option<LocalObjectReference>,

    /// Provider object implementing an external step
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<ObjectReference>,

    /// Retry budget, used as the Job backoff limit
    #[serde(default = "default_retries")]
    pub retries: i32,

    /// Runtime status of the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProvisionerStatus>,

    /// Reason captured from the failed execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Message captured from the failed execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ProvisionerSpec {
    /// A built-in shell step running an inline script.
    pub fn shell(run: impl Into<String>) -> Self {
        Self {
            uuid: None,
            kind: ProvisionerKind::BuiltinShell,
            allow_fail: false,
            run: Some(run.into()),
            run_config_map_ref: None,
            reference: None,
            retries: default_retries(),
            status: None,
            failure_reason: None,
            failure_message: None,
        }
    }

    /// Reference to the provider object of an external step.
    pub fn external_ref(&self) -> Option<&ObjectReference> {
        match self.kind {
            ProvisionerKind::External => self.reference.as_ref(),
            ProvisionerKind::BuiltinShell => None,
        }
    }

    /// Status, treating unset as Pending.
    pub fn current_status(&self) -> ProvisionerStatus {
        self.status.unwrap_or(ProvisionerStatus::Pending)
    }
}

/// Execution strategy of a provisioner step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ProvisionerKind {
    /// Script executed by the built-in shell provisioner Job
    #[serde(rename = "built-in/shell")]
    BuiltinShell,

    /// Step implemented by a provider-owned object
    #[serde(rename = "external")]
    External,
}

/// Runtime status of a provisioner step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ProvisionerStatus {
    /// Not started
    Pending,
    /// Job created
    Running,
    /// Job finished successfully
    Completed,
    /// Job failed
    Failed,
    /// Anything unrecognized
    #[serde(other)]
    Unknown,
}

impl ProvisionerStatus {
    /// Completed and Failed are terminal; nothing moves a step out of them
    /// without a new UUID.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
