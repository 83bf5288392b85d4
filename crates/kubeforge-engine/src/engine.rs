//! Reconciliation engine
//!
//! Drives a managed object through its provider's step lists:
//!
//! - **create** executes exactly one step per call and resumes from the
//!   persisted conditions, so a crash between calls loses nothing but the
//!   step that was in flight (which is re-run, hence idempotency).
//! - **update** re-runs update steps on a running object, either a selected
//!   subset (recording a condition per step) or all of them (recording none).
//! - **delete** runs every delete step in one pass and leaves no trace.
//!
//! The engine never persists anything itself. Callers write the mutated
//! status back after each call, and own requeueing and concurrency.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubeforge_common::conditions;
use kubeforge_common::crd::{Condition, ConditionReason, Phase};
use kubeforge_common::{Error, ManagedObject, Result};

use crate::registry::{StepList, StepRegistry};
use crate::skip::SkipListSource;
use crate::step::{LifecycleAction, StepContext};

/// A step whose handler returned an error
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    /// Step name
    pub step: String,
    /// Handler error message
    pub message: String,
}

/// Result of one create call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran successfully
    Succeeded {
        /// Step that ran
        step: String,
        /// Step queued next, `None` once creation is complete
        next: Option<String>,
    },
    /// The step was on the skip-list and recorded as done
    Skipped {
        /// Step that was skipped
        step: String,
        /// Step queued next, `None` once creation is complete
        next: Option<String>,
    },
    /// The step's handler failed; the same step is retried next call
    Failed(StepFailure),
}

impl StepOutcome {
    /// Step this outcome concerns
    pub fn step(&self) -> &str {
        match self {
            Self::Succeeded { step, .. } | Self::Skipped { step, .. } => step,
            Self::Failed(failure) => &failure.step,
        }
    }

    /// Returns true if the last create step just finished
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { next: None, .. } | Self::Skipped { next: None, .. }
        )
    }

    /// Returns true if the handler failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of a selective update
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Steps that succeeded, in execution order
    pub completed: Vec<String>,
    /// The step that stopped the run, if any
    pub failed: Option<StepFailure>,
}

impl UpdateOutcome {
    /// Returns true if every selected step succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

/// Executes provider step lists against managed objects
#[derive(Clone)]
pub struct Engine {
    skip_list: Arc<dyn SkipListSource>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Create an engine reading skip-lists from the given source
    pub fn new(skip_list: Arc<dyn SkipListSource>) -> Self {
        Self {
            skip_list,
            shutdown: CancellationToken::new(),
        }
    }

    /// Propagate an operator shutdown token into every step context
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn context(&self, object: &str, step: &str, action: LifecycleAction) -> StepContext {
        StepContext::new(object, step, action, self.shutdown.child_token())
    }

    /// Execute the current create step
    ///
    /// Resolves the current step from the object's conditions, runs (or
    /// skips) it, and records the result. On success the next step is queued
    /// with a Waiting condition; after the last step the phase becomes
    /// Running. A handler failure is reported as [`StepOutcome::Failed`], not
    /// as an error: the step's condition is False and the next call retries
    /// it.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if the phase is already terminal
    /// - `NoSteps` if the provider has no create steps
    /// - `UnknownStep` if a pending condition names an unregistered step
    /// - `NoStepToProcess` if every create step is already recorded as done
    /// - any error from reading the skip-list
    pub async fn create<O: ManagedObject>(
        &self,
        steps: &StepRegistry<O>,
        object: &mut O,
    ) -> Result<StepOutcome> {
        let name = object.object_name();
        if object.phase().is_terminal() {
            return Err(Error::already_running(&name));
        }
        let create = steps.create();
        if create.is_empty() {
            return Err(Error::no_steps(&name, LifecycleAction::Create.to_string()));
        }

        let skip = self.skip_list.skip_list().await?;
        let current = resolve_current(create, object.conditions(), &name)?;
        if conditions::find(object.conditions(), &current).is_none() {
            conditions::set(object.conditions_mut(), Condition::waiting(&current));
        }

        let step = create
            .get(&current)
            .ok_or_else(|| Error::unknown_step(&name, &current))?;

        let skipped = skip.contains(&current);
        if skipped {
            info!(object = %name, step = %current, "step is on the skip-list, marking done");
            conditions::set(object.conditions_mut(), Condition::skipped(&current));
        } else {
            debug!(object = %name, step = %current, "running create step");
            let ctx = self.context(&name, &current, LifecycleAction::Create);
            if let Err(e) = step.run(&ctx, object).await {
                let message = e.to_string();
                warn!(object = %name, step = %current, error = %message, "create step failed");
                conditions::set(
                    object.conditions_mut(),
                    Condition::failed(&current, &message),
                );
                object.set_failure(&ConditionReason::Failed.to_string(), &message);
                return Ok(StepOutcome::Failed(StepFailure {
                    step: current,
                    message,
                }));
            }
            conditions::set(object.conditions_mut(), Condition::succeeded(&current));
        }

        let next = create
            .after(&current)
            .iter()
            .find(|s| !conditions::is_true(object.conditions(), s.name()))
            .map(|s| s.name().to_string());

        match &next {
            Some(next_step) => {
                if conditions::find(object.conditions(), next_step).is_none() {
                    conditions::set(object.conditions_mut(), Condition::waiting(next_step));
                }
                info!(object = %name, step = %current, next = %next_step, "create step done");
            }
            None => {
                object.set_phase(Phase::Running);
                info!(object = %name, step = %current, "all create steps done, object is running");
            }
        }

        Ok(if skipped {
            StepOutcome::Skipped {
                step: current,
                next,
            }
        } else {
            StepOutcome::Succeeded {
                step: current,
                next,
            }
        })
    }

    /// Run the selected update steps
    ///
    /// Runs, in registration order, each update step whose name is in
    /// `selected`, recording a True or False condition per step. Stops at the
    /// first failure. Selected names are checked before anything runs, so an
    /// unknown name leaves the object untouched.
    ///
    /// # Errors
    ///
    /// `UnknownStep` if a selected name is not a registered update step.
    pub async fn update_selected<O: ManagedObject>(
        &self,
        steps: &StepRegistry<O>,
        object: &mut O,
        selected: &[String],
    ) -> Result<UpdateOutcome> {
        let name = object.object_name();
        let update = steps.update();
        if let Some(unknown) = selected.iter().find(|s| update.get(s).is_none()) {
            return Err(Error::unknown_step(&name, unknown));
        }

        let mut outcome = UpdateOutcome::default();
        for step in update.iter().filter(|s| selected.iter().any(|n| n == s.name())) {
            let ctx = self.context(&name, step.name(), LifecycleAction::Update);
            debug!(object = %name, step = %step.name(), "running selected update step");
            match step.run(&ctx, object).await {
                Ok(()) => {
                    conditions::set(object.conditions_mut(), Condition::succeeded(step.name()));
                    outcome.completed.push(step.name().to_string());
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(object = %name, step = %step.name(), error = %message, "update step failed");
                    conditions::set(
                        object.conditions_mut(),
                        Condition::failed(step.name(), &message),
                    );
                    object.set_failure(&ConditionReason::Failed.to_string(), &message);
                    outcome.failed = Some(StepFailure {
                        step: step.name().to_string(),
                        message,
                    });
                    return Ok(outcome);
                }
            }
        }

        if !outcome.completed.is_empty() {
            info!(object = %name, steps = ?outcome.completed, "selected update steps done");
        }
        Ok(outcome)
    }

    /// Run every update step
    ///
    /// Records no conditions. A failure is mirrored onto the object's status
    /// and returned as `Error::Step`; full success clears the mirror.
    pub async fn update_all<O: ManagedObject>(
        &self,
        steps: &StepRegistry<O>,
        object: &mut O,
    ) -> Result<()> {
        let name = object.object_name();
        for step in steps.update().iter() {
            let ctx = self.context(&name, step.name(), LifecycleAction::Update);
            debug!(object = %name, step = %step.name(), "running update step");
            if let Err(e) = step.run(&ctx, object).await {
                let message = e.to_string();
                warn!(object = %name, step = %step.name(), error = %message, "update step failed");
                object.set_failure(&ConditionReason::Failed.to_string(), &message);
                return Err(Error::step(&name, step.name(), message));
            }
        }
        object.clear_failure();
        Ok(())
    }

    /// Run every delete step
    ///
    /// Records nothing on the object. Stops at the first failure.
    pub async fn delete<O: ManagedObject>(
        &self,
        steps: &StepRegistry<O>,
        object: &mut O,
    ) -> Result<()> {
        let name = object.object_name();
        for step in steps.delete().iter() {
            let ctx = self.context(&name, step.name(), LifecycleAction::Delete);
            debug!(object = %name, step = %step.name(), "running delete step");
            step.run(&ctx, object).await.map_err(|e| {
                warn!(object = %name, step = %step.name(), error = %e, "delete step failed");
                Error::step(&name, step.name(), e.to_string())
            })?;
        }
        info!(object = %name, "delete steps done");
        Ok(())
    }
}

/// Work out which create step is current
///
/// - no conditions: the first registered step
/// - otherwise the first condition that is False or Unknown
/// - otherwise, if fewer conditions than steps exist, the first registered
///   step without a condition
fn resolve_current<O: Send>(
    create: &StepList<O>,
    recorded: &[Condition],
    object: &str,
) -> Result<String> {
    if recorded.is_empty() {
        return create
            .first()
            .map(|s| s.name().to_string())
            .ok_or_else(|| Error::no_steps(object, LifecycleAction::Create.to_string()));
    }

    if let Some(pending) = conditions::first_pending(recorded) {
        if create.get(&pending.type_).is_none() {
            return Err(Error::unknown_step(object, &pending.type_));
        }
        return Ok(pending.type_.clone());
    }

    if recorded.len() < create.len() {
        if let Some(step) = create
            .iter()
            .find(|s| conditions::find(recorded, s.name()).is_none())
        {
            return Ok(step.name().to_string());
        }
    }

    Err(Error::no_step_to_process(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skip::StaticSkipList;
    use crate::step::{Step, StepHandler};
    use async_trait::async_trait;
    use kubeforge_common::crd::{ConditionStatus, LifecycleStatus};

    #[derive(Default)]
    struct Object {
        status: Option<LifecycleStatus>,
    }

    impl ManagedObject for Object {
        fn object_name(&self) -> String {
            "obj".to_string()
        }
        fn provider(&self) -> &str {
            "test"
        }
        fn lifecycle_status(&self) -> Option<&LifecycleStatus> {
            self.status.as_ref()
        }
        fn lifecycle_status_mut(&mut self) -> &mut LifecycleStatus {
            self.status.get_or_insert_with(LifecycleStatus::default)
        }
    }

    struct Fails;

    #[async_trait]
    impl StepHandler<Object> for Fails {
        async fn run(&self, _ctx: &StepContext, _object: &mut Object) -> Result<()> {
            Err(Error::internal("boom"))
        }
    }

    struct Succeeds;

    #[async_trait]
    impl StepHandler<Object> for Succeeds {
        async fn run(&self, _ctx: &StepContext, _object: &mut Object) -> Result<()> {
            Ok(())
        }
    }

    fn engine() -> Engine {
        Engine::new(Arc::new(StaticSkipList::empty()))
    }

    #[test]
    fn test_outcome_helpers() {
        let done = StepOutcome::Succeeded {
            step: "c".into(),
            next: None,
        };
        assert!(done.is_complete());
        assert_eq!(done.step(), "c");

        let skipped = StepOutcome::Skipped {
            step: "b".into(),
            next: Some("c".into()),
        };
        assert!(!skipped.is_complete());
        assert!(!skipped.is_failed());

        let failed = StepOutcome::Failed(StepFailure {
            step: "a".into(),
            message: "x".into(),
        });
        assert!(failed.is_failed());
        assert!(!failed.is_complete());
        assert_eq!(failed.step(), "a");
    }

    #[test]
    fn test_resolve_prefers_pending_condition() {
        let registry = StepRegistry::builder("test")
            .create(Step::new("a", Succeeds))
            .create(Step::new("b", Succeeds))
            .create(Step::new("c", Succeeds))
            .build()
            .unwrap();
        let recorded = vec![
            Condition::succeeded("a"),
            Condition::failed("b", "boom"),
        ];
        assert_eq!(
            resolve_current(registry.create(), &recorded, "obj").unwrap(),
            "b"
        );
    }

    #[test]
    fn test_resolve_falls_back_to_first_unrecorded_step() {
        let registry = StepRegistry::builder("test")
            .create(Step::new("a", Succeeds))
            .create(Step::new("b", Succeeds))
            .create(Step::new("c", Succeeds))
            .build()
            .unwrap();
        let recorded = vec![Condition::succeeded("a"), Condition::skipped("c")];
        assert_eq!(
            resolve_current(registry.create(), &recorded, "obj").unwrap(),
            "b"
        );
    }

    #[test]
    fn test_resolve_nothing_left() {
        let registry = StepRegistry::builder("test")
            .create(Step::new("a", Succeeds))
            .build()
            .unwrap();
        let recorded = vec![Condition::succeeded("a")];
        assert!(matches!(
            resolve_current(registry.create(), &recorded, "obj"),
            Err(Error::NoStepToProcess { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_failure_is_an_outcome_not_an_error() {
        let registry = StepRegistry::builder("test")
            .create(Step::new("a", Fails))
            .build()
            .unwrap();
        let mut obj = Object::default();

        let outcome = engine().create(&registry, &mut obj).await.unwrap();
        assert!(outcome.is_failed());

        let status = obj.lifecycle_status().unwrap();
        assert_eq!(status.reason.as_deref(), Some("Failed"));
        assert!(status.message.as_deref().unwrap().contains("boom"));
        assert_eq!(status.phase, Phase::Pending);
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_delete_wraps_handler_error() {
        let registry = StepRegistry::builder("test")
            .delete(Step::new("drain", Fails))
            .build()
            .unwrap();
        let err = engine()
            .delete(&registry, &mut Object::default())
            .await
            .unwrap_err();
        assert_eq!(err.step_name(), Some("drain"));
        assert_eq!(err.object(), Some("obj"));
    }
}
