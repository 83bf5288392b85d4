//! Condition store helpers
//!
//! A managed object's conditions form an ordered log of step progress: at
//! most one entry per step, appended when the step first becomes current and
//! transitioned in place afterwards. Entries are never reordered or removed.

use chrono::Utc;

use crate::crd::{Condition, ConditionStatus};

/// Find the condition recorded for a step
pub fn find<'a>(conditions: &'a [Condition], step: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == step)
}

/// Insert or transition the condition for `condition.type_`
///
/// An existing entry keeps its position. Its transition time only moves
/// when the status actually changes; the probe time always does.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            condition.last_probe_time = Utc::now();
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// First condition, in recorded order, whose step still has to run
pub fn first_pending(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.status.is_pending())
}

/// Returns true if the step's condition is True
pub fn is_true(conditions: &[Condition], step: &str) -> bool {
    find(conditions, step).is_some_and(|c| c.status == ConditionStatus::True)
}
