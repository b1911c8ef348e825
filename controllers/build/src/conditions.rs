//! Condition list manipulation.
//!
//! `set` is the only writer: it keeps the list sorted (Ready first, then by
//! type), leaves an identical condition untouched and only moves
//! `lastTransitionTime` when the status flips. That keeps repeated passes
//! over unchanged state free of writes.

use crate::error::ControllerError;
use chrono::Utc;
use crds::{Condition, ConditionSeverity, ConditionStatus, READY_CONDITION};
use kube::api::DynamicObject;
use std::cmp::Ordering;

/// Condition of the given type
pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// A condition of the given type exists
pub fn has(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some()
}

/// A condition of the given type exists and is True
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some_and(Condition::is_true)
}

fn order(a: &Condition, b: &Condition) -> Ordering {
    match (a.type_ == READY_CONDITION, b.type_ == READY_CONDITION) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.type_.cmp(&b.type_),
    }
}

/// Inserts or replaces a condition.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_state(&condition) => {}
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                Some(Utc::now())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
            conditions.sort_by(order);
        }
    }
}

/// Sets a True condition.
pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) {
    set(conditions, Condition::true_condition(type_));
}

/// Sets a False condition.
pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: &str,
) {
    set(conditions, Condition::false_condition(type_, reason, severity, message));
}

/// Removes a condition.
pub fn delete(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/// Value used when the mirrored object has no Ready condition
#[derive(Debug, Clone, Copy)]
pub struct Fallback<'a> {
    /// Use a True condition instead of the False one below
    pub ready: bool,
    /// Reason of the False fallback
    pub reason: &'a str,
    /// Severity of the False fallback
    pub severity: ConditionSeverity,
}

impl<'a> Fallback<'a> {
    /// Info-severity fallback
    pub fn info(ready: bool, reason: &'a str) -> Self {
        Self { ready, reason, severity: ConditionSeverity::Info }
    }
}

/// The `Ready` condition from `status.conditions` of an untyped object.
pub fn ready_condition_of(object: &DynamicObject) -> Result<Option<Condition>, ControllerError> {
    let Some(list) = object
        .data
        .get("status")
        .and_then(|status| status.get("conditions"))
        .and_then(|conditions| conditions.as_array())
    else {
        return Ok(None);
    };
    let Some(raw) = list
        .iter()
        .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(READY_CONDITION))
    else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(raw.clone())?))
}

/// Copies the object's Ready condition under `target`, or the fallback.
pub fn mirror(
    conditions: &mut Vec<Condition>,
    target: &str,
    object: &DynamicObject,
    fallback: Fallback<'_>,
) -> Result<(), ControllerError> {
    let condition = match ready_condition_of(object)? {
        Some(mut source) => {
            source.type_ = target.to_string();
            source.last_transition_time = None;
            source
        }
        None if fallback.ready => Condition::true_condition(target),
        None => Condition::false_condition(target, fallback.reason, fallback.severity, ""),
    };
    set(conditions, condition);
    Ok(())
}

/// Recomputes `Ready` as the AND of the `inputs` that are present.
///
/// A False summary takes reason, severity and message from the most severe
/// False input (the earliest listed on ties). With no inputs present, Ready
/// is removed.
pub fn set_summary(conditions: &mut Vec<Condition>, inputs: &[&str]) {
    let present: Vec<&Condition> = inputs.iter().filter_map(|t| get(conditions, t)).collect();
    if present.is_empty() {
        delete(conditions, READY_CONDITION);
        return;
    }

    let severity_of = |c: &Condition| c.severity.unwrap_or(ConditionSeverity::Info);
    let worst_false = present
        .iter()
        .copied()
        .filter(|c| c.status == ConditionStatus::False)
        .fold(None::<&Condition>, |worst, c| match worst {
            Some(w) if severity_of(w) >= severity_of(c) => Some(w),
            _ => Some(c),
        });

    let summary = if let Some(source) = worst_false {
        Condition {
            type_: READY_CONDITION.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity_of(source)),
            last_transition_time: None,
            reason: source.reason.clone(),
            message: source.message.clone(),
        }
    } else if let Some(source) = present.iter().find(|c| c.status == ConditionStatus::Unknown) {
        Condition {
            type_: READY_CONDITION.to_string(),
            status: ConditionStatus::Unknown,
            severity: None,
            last_transition_time: None,
            reason: source.reason.clone(),
            message: source.message.clone(),
        }
    } else {
        Condition::true_condition(READY_CONDITION)
    };
    set(conditions, summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{
        INFRASTRUCTURE_READY_CONDITION, PROVISIONERS_READY_CONDITION, WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON,
        WAITING_FOR_PROVISIONERS_REASON,
    };
    use kube::api::{ApiResource, GroupVersionKind};
    use serde_json::json;

    const INPUTS: [&str; 2] = [INFRASTRUCTURE_READY_CONDITION, PROVISIONERS_READY_CONDITION];

    fn object_with_status(status: serde_json::Value) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("infrastructure.forge.build", "v1alpha1", "TestInfra");
        DynamicObject::new("x", &ApiResource::from_gvk(&gvk)).data(json!({"status": status}))
    }

    #[test]
    fn test_set_keeps_ready_first_and_sorted() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, PROVISIONERS_READY_CONDITION);
        mark_true(&mut conditions, READY_CONDITION);
        mark_true(&mut conditions, INFRASTRUCTURE_READY_CONDITION);
        let types: Vec<&str> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec![READY_CONDITION, INFRASTRUCTURE_READY_CONDITION, PROVISIONERS_READY_CONDITION]);
    }

    #[test]
    fn test_set_same_state_is_untouched() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, READY_CONDITION);
        let before = conditions.clone();
        mark_true(&mut conditions, READY_CONDITION);
        assert_eq!(conditions, before);
    }

    #[test]
    fn test_transition_time_moves_only_on_status_flip() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, READY_CONDITION, "A", ConditionSeverity::Info, "");
        let first = conditions[0].last_transition_time;

        mark_false(&mut conditions, READY_CONDITION, "B", ConditionSeverity::Info, "");
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].reason.as_deref(), Some("B"));

        mark_true(&mut conditions, READY_CONDITION);
        assert!(conditions[0].is_true());
    }

    #[test]
    fn test_mirror_copies_ready_condition() {
        let object = object_with_status(json!({
            "conditions": [{"type": "Ready", "status": "False", "severity": "Warning", "reason": "Booting", "message": "vm starting"}]
        }));
        let mut conditions = Vec::new();
        mirror(
            &mut conditions,
            INFRASTRUCTURE_READY_CONDITION,
            &object,
            Fallback::info(false, WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON),
        )
        .unwrap();
        let mirrored = get(&conditions, INFRASTRUCTURE_READY_CONDITION).unwrap();
        assert_eq!(mirrored.status, ConditionStatus::False);
        assert_eq!(mirrored.reason.as_deref(), Some("Booting"));
        assert_eq!(mirrored.severity, Some(ConditionSeverity::Warning));
    }

    #[test]
    fn test_mirror_uses_fallback_when_absent() {
        let object = object_with_status(json!({"ready": false}));
        let mut conditions = Vec::new();
        mirror(
            &mut conditions,
            INFRASTRUCTURE_READY_CONDITION,
            &object,
            Fallback::info(false, WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON),
        )
        .unwrap();
        let mirrored = get(&conditions, INFRASTRUCTURE_READY_CONDITION).unwrap();
        assert_eq!(mirrored.reason.as_deref(), Some(WAITING_FOR_INFRASTRUCTURE_FALLBACK_REASON));

        mirror(&mut conditions, INFRASTRUCTURE_READY_CONDITION, &object, Fallback::info(true, "unused")).unwrap();
        assert!(is_true(&conditions, INFRASTRUCTURE_READY_CONDITION));
    }

    #[test]
    fn test_summary_is_and_of_present_inputs() {
        let mut conditions = Vec::new();
        set_summary(&mut conditions, &INPUTS);
        assert!(!has(&conditions, READY_CONDITION));

        mark_true(&mut conditions, INFRASTRUCTURE_READY_CONDITION);
        set_summary(&mut conditions, &INPUTS);
        assert!(is_true(&conditions, READY_CONDITION));

        mark_false(
            &mut conditions,
            PROVISIONERS_READY_CONDITION,
            WAITING_FOR_PROVISIONERS_REASON,
            ConditionSeverity::Info,
            "",
        );
        set_summary(&mut conditions, &INPUTS);
        let ready = get(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some(WAITING_FOR_PROVISIONERS_REASON));
    }

    #[test]
    fn test_summary_prefers_most_severe_false_input() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, INFRASTRUCTURE_READY_CONDITION, "Slow", ConditionSeverity::Info, "");
        mark_false(&mut conditions, PROVISIONERS_READY_CONDITION, "Broken", ConditionSeverity::Error, "exit 1");
        set_summary(&mut conditions, &INPUTS);
        let ready = get(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.reason.as_deref(), Some("Broken"));
        assert_eq!(ready.message.as_deref(), Some("exit 1"));
    }
}
