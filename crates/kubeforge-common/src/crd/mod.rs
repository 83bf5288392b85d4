//! Custom Resource Definitions for Kubeforge
//!
//! - [`ForgeCluster`]: a remote cluster provisioned step by step
//! - [`ForgeMachine`]: a member machine of a cluster

mod cluster;
mod machine;
mod types;

pub use cluster::{ForgeCluster, ForgeClusterSpec};
pub use machine::{ForgeMachine, ForgeMachineSpec, MachineRole};
pub use types::{
    Condition, ConditionReason, ConditionStatus, LifecycleStatus, Phase, SecretRef,
};
