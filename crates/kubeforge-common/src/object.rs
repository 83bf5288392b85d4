//! The managed-object view the step engine works against
//!
//! Clusters and machines share [`LifecycleStatus`]; the engine only reads and
//! writes that status, never the spec.

use kube::ResourceExt;

use crate::crd::{Condition, ForgeCluster, ForgeMachine, LifecycleStatus, Phase};

/// An object whose lifecycle is driven by the step engine
pub trait ManagedObject: Send + Sync {
    /// Name used in logs, errors, and step contexts
    fn object_name(&self) -> String;

    /// Provider whose step lists apply to this object
    fn provider(&self) -> &str;

    /// Current status, if one was ever written
    fn lifecycle_status(&self) -> Option<&LifecycleStatus>;

    /// Mutable status, created on first access
    fn lifecycle_status_mut(&mut self) -> &mut LifecycleStatus;

    /// Recorded step conditions
    fn conditions(&self) -> &[Condition] {
        self.lifecycle_status()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    /// Mutable step conditions
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.lifecycle_status_mut().conditions
    }

    /// Current phase (Pending when no status exists)
    fn phase(&self) -> Phase {
        self.lifecycle_status().map(|s| s.phase).unwrap_or_default()
    }

    /// Set the phase
    fn set_phase(&mut self, phase: Phase) {
        self.lifecycle_status_mut().phase = phase;
    }

    /// Mirror a failure onto the object for quick inspection
    fn set_failure(&mut self, reason: &str, message: &str) {
        let status = self.lifecycle_status_mut();
        status.reason = Some(reason.to_string());
        status.message = Some(message.to_string());
    }

    /// Clear the mirrored failure
    fn clear_failure(&mut self) {
        let status = self.lifecycle_status_mut();
        status.reason = None;
        status.message = None;
    }
}

impl ManagedObject for ForgeCluster {
    fn object_name(&self) -> String {
        self.name_any()
    }

    fn provider(&self) -> &str {
        &self.spec.provider
    }

    fn lifecycle_status(&self) -> Option<&LifecycleStatus> {
        self.status.as_ref()
    }

    fn lifecycle_status_mut(&mut self) -> &mut LifecycleStatus {
        self.status.get_or_insert_with(LifecycleStatus::default)
    }
}

impl ManagedObject for ForgeMachine {
    fn object_name(&self) -> String {
        self.name_any()
    }

    fn provider(&self) -> &str {
        &self.spec.provider
    }

    fn lifecycle_status(&self) -> Option<&LifecycleStatus> {
        self.status.as_ref()
    }

    fn lifecycle_status_mut(&mut self) -> &mut LifecycleStatus {
        self.status.get_or_insert_with(LifecycleStatus::default)
    }
}
