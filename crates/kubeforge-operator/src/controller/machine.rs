//! ForgeMachine reconciler
//!
//! Machines share the cluster create and delete flow. Once Running, every
//! reconcile runs all update steps; failures are mirrored onto the status
//! and retried through the error policy.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use kubeforge_common::crd::ForgeMachine;
use kubeforge_common::{Error, ManagedObject, Result, CLEANUP_FINALIZER};

use super::{attribute_to, create_action, error_action, has_cleanup_finalizer, RESYNC_INTERVAL};
use crate::context::Context;

/// Reconcile a ForgeMachine
#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
pub async fn reconcile(machine: Arc<ForgeMachine>, ctx: Arc<Context>) -> Result<Action> {
    let name = machine.name_any();

    // Deletion does not depend on the spec still being valid
    if machine.metadata.deletion_timestamp.is_some() {
        if !has_cleanup_finalizer(&machine.metadata) {
            debug!("machine deleting without finalizer, nothing to do");
            return Ok(Action::await_change());
        }
        match ctx.machine_providers.resolve(&machine.spec.provider) {
            Ok(steps) => {
                info!("running delete steps");
                let mut working = (*machine).clone();
                ctx.engine.delete(&steps, &mut working).await?;
            }
            Err(e) => {
                warn!(error = %e, "provider not resolvable, releasing finalizer without delete steps");
            }
        }
        ctx.kube
            .remove_machine_finalizer(&name, CLEANUP_FINALIZER)
            .await?;
        return Ok(Action::await_change());
    }

    machine.spec.validate().map_err(|e| attribute_to(&name, e))?;
    let steps = ctx.machine_providers.resolve(&machine.spec.provider)?;
    let mut working = (*machine).clone();

    if !has_cleanup_finalizer(&machine.metadata) {
        ctx.kube.add_machine_finalizer(&name, CLEANUP_FINALIZER).await?;
    }

    if !working.phase().is_terminal() {
        let outcome = ctx.engine.create(&steps, &mut working).await?;
        persist_status(&ctx, &machine, &working).await?;
        return Ok(create_action(&outcome));
    }

    let result = ctx.engine.update_all(&steps, &mut working).await;
    persist_status(&ctx, &machine, &working).await?;
    result?;
    Ok(Action::requeue(RESYNC_INTERVAL))
}

async fn persist_status(ctx: &Context, original: &ForgeMachine, working: &ForgeMachine) -> Result<()> {
    if working.status == original.status {
        return Ok(());
    }
    match working.status.as_ref() {
        Some(status) => {
            ctx.kube
                .patch_machine_status(&original.name_any(), status)
                .await
        }
        None => Ok(()),
    }
}

/// Error policy for the ForgeMachine controller
pub fn error_policy(machine: Arc<ForgeMachine>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        machine = %machine.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}
