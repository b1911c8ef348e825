//! Status conditions
//!
//! Conditions follow the Cluster API convention: a typed entry with a
//! tri-state status, an optional severity for `False` conditions, and a
//! reason/message pair. `Ready` is a summary computed from other conditions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition; always derived, never set directly
pub const READY_CONDITION: &str = "Ready";

/// Mirrors the referenced infrastructure object's Ready condition
pub const INFRASTRUCTURE_READY_CONDITION: &str = "InfrastructureReady";

/// Reports whether every provisioner step has finished
pub const PROVISIONERS_READY_CONDITION: &str = "ProvisionersReady";

/// Reports that the build produced its image
pub const BUILD_INITIALIZED_CONDITION: &str = "BuildInitialized";

/// Used when the infrastructure object has no Ready condition to mirror
pub const WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON: &str = "WaitingForInfrastructure";

/// Infrastructure is ready but no transport session exists yet
pub const WAITING_FOR_CONNECTION_REASON: &str = "WaitingForConnection";

/// Connected but provisioner steps have not all finished
pub const WAITING_FOR_PROVISIONERS_REASON: &str = "WaitingForProvisioners";

/// The referenced object is gone
pub const DELETED_REASON: &str = "Deleted";

/// The referenced object is being deleted
pub const DELETING_REASON: &str = "Deleting";

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Unknown
    #[default]
    Unknown,
}

/// Severity of a `False` condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionSeverity {
    /// Informational, expected to resolve on its own
    Info,
    /// Degraded but progressing
    Warning,
    /// Requires intervention
    Error,
}

/// A single condition in `status.conditions`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within the list
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Severity, only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    /// A True condition of the given type.
    pub fn true_condition(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    /// A False condition with reason, severity and message.
    pub fn false_condition(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        }
    }

    /// Returns true when status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Compares everything but the transition time.
    pub fn same_state(&self, other: &Self) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}
