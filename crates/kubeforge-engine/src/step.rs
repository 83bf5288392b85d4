//! Step identity and the handler contract
//!
//! A step pairs an author-supplied name with a handler. The name is the join
//! key between the handler and the condition recording its progress, so it
//! must stay stable across releases.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use kubeforge_common::Result;

/// Lifecycle action a step belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Provisioning, one step per reconcile
    Create,
    /// Re-running update steps on a running object
    Update,
    /// Teardown
    Delete,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Per-invocation context handed to a step handler
///
/// Borrowed for the duration of one call; handlers cannot keep it.
#[derive(Debug)]
pub struct StepContext {
    object: String,
    step: String,
    action: LifecycleAction,
    cancel: CancellationToken,
}

impl StepContext {
    /// Create a context for one step invocation
    pub fn new(
        object: impl Into<String>,
        step: impl Into<String>,
        action: LifecycleAction,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            object: object.into(),
            step: step.into(),
            action,
            cancel,
        }
    }

    /// Name of the object being reconciled
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Name of the running step
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Action the step runs under
    pub fn action(&self) -> LifecycleAction {
        self.action
    }

    /// Fires when the operator is shutting down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One idempotent unit of lifecycle work
///
/// Handlers may be invoked more than once for the same object and step (after
/// a failure, or after an operator restart mid-step) and must tolerate it.
/// `Ok(())` means the step is fully done.
#[async_trait]
pub trait StepHandler<O: Send>: Send + Sync {
    /// Run the step against the object
    async fn run(&self, ctx: &StepContext, object: &mut O) -> Result<()>;
}

/// Handler built from a closure returning a boxed future
struct FnHandler<F>(F);

#[async_trait]
impl<O, F> StepHandler<O> for FnHandler<F>
where
    O: Send,
    F: for<'a> Fn(&'a StepContext, &'a mut O) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn run(&self, ctx: &StepContext, object: &mut O) -> Result<()> {
        (self.0)(ctx, object).await
    }
}

/// A named step
pub struct Step<O> {
    name: String,
    handler: Arc<dyn StepHandler<O>>,
}

impl<O: Send + 'static> Step<O> {
    /// Create a step from a handler
    pub fn new(name: impl Into<String>, handler: impl StepHandler<O> + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    /// Create a step from a shared handler
    pub fn from_arc(name: impl Into<String>, handler: Arc<dyn StepHandler<O>>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    /// Create a step from a closure
    ///
    /// ```ignore
    /// let step = Step::from_fn("label-nodes", |_ctx, cluster: &mut ForgeCluster| {
    ///     async move { label(cluster).await }.boxed()
    /// });
    /// ```
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a StepContext, &'a mut O) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, FnHandler(f))
    }
}

impl<O: Send> Step<O> {
    /// Stable step name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the handler
    pub async fn run(&self, ctx: &StepContext, object: &mut O) -> Result<()> {
        self.handler.run(ctx, object).await
    }
}

impl<O> Clone for Step<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<O> fmt::Debug for Step<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}
