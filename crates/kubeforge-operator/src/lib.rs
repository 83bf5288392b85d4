//! Kubeforge operator
//!
//! Wires the step engine and the cluster registry into kube-rs controllers
//! for ForgeCluster and ForgeMachine:
//!
//! - [`client`]: the Kubernetes operations the reconcilers need
//! - [`context`]: shared controller state
//! - [`controller`]: reconcile and error policies
//! - [`skip_list`]: ConfigMap-backed skip-list
//! - [`steps`]: built-in steps and the `external` provider
//! - [`runner`]: controller and health-loop futures

#![deny(missing_docs)]

pub mod client;
pub mod context;
pub mod controller;
pub mod runner;
pub mod skip_list;
pub mod steps;

#[cfg(test)]
mod testing;

pub use context::{Context, ContextBuilder};

pub use kubeforge_common::{Error, Result};
