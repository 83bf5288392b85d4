//! Resumable step-execution engine for Kubeforge
//!
//! Turns ordered lists of idempotent, named steps into a crash-safe state
//! machine whose only memory is the condition list persisted on the managed
//! object. Every call resolves "where am I" from those conditions, so a
//! restarted operator picks up exactly where the last one stopped.
//!
//! - [`step`]: step identity and the handler contract
//! - [`registry`]: per-provider create/update/delete step lists
//! - [`skip`]: skip-list sources consulted on create
//! - [`engine`]: the create, update, and delete state machines

#![deny(missing_docs)]

pub mod engine;
pub mod registry;
pub mod skip;
pub mod step;

pub use engine::{Engine, StepFailure, StepOutcome, UpdateOutcome};
pub use registry::{ProviderRegistry, StepList, StepRegistry, StepRegistryBuilder};
pub use skip::{SkipListSource, StaticSkipList};
pub use step::{LifecycleAction, Step, StepContext, StepHandler};

pub use kubeforge_common::{Error, Result};
