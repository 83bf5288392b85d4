//! ForgeCluster and ForgeMachine controllers
//!
//! Both reconcilers follow the same shape: validate, resolve the provider's
//! step registry, then either run delete steps (finalizer-guarded), one
//! create step, or the kind's update flavour, and persist the status the
//! engine produced.

pub mod cluster;
pub mod machine;

use std::collections::BTreeMap;
use std::time::Duration;

use kube::api::ObjectMeta;
use kube::runtime::controller::Action;

use kubeforge_common::config::parse_step_list;
use kubeforge_common::{Error, CLEANUP_FINALIZER, UPDATE_STEPS_ANNOTATION};
use kubeforge_engine::StepOutcome;

/// Requeue after a retryable reconcile error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue after a step handler failed
pub const FAILED_STEP_REQUEUE: Duration = Duration::from_secs(10);
/// Periodic resync of settled objects
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue action after a create step
///
/// A failed step retries after a short delay; a step that advanced requeues
/// at once to run the next; a finished create settles into periodic resync.
pub fn create_action(outcome: &StepOutcome) -> Action {
    if outcome.is_failed() {
        Action::requeue(FAILED_STEP_REQUEUE)
    } else if outcome.is_complete() {
        Action::requeue(RESYNC_INTERVAL)
    } else {
        Action::requeue(Duration::ZERO)
    }
}

/// Requeue action for a reconcile error
///
/// Errors that need a spec or configuration fix wait for the next change.
pub fn error_action(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::await_change()
    }
}

/// Attach the object name to a spec validation error
pub(crate) fn attribute_to(object: &str, error: Error) -> Error {
    match error {
        Error::Validation { message, field, .. } => Error::Validation {
            object: object.to_string(),
            message,
            field,
        },
        other => other,
    }
}

/// Returns true if the cleanup finalizer is present
pub fn has_cleanup_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == CLEANUP_FINALIZER))
}

/// Update steps requested through the update-steps annotation
pub fn selected_update_steps(annotations: &BTreeMap<String, String>) -> Vec<String> {
    annotations
        .get(UPDATE_STEPS_ANNOTATION)
        .map(|raw| parse_step_list(raw))
        .unwrap_or_default()
}
