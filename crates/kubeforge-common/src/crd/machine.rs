//! ForgeMachine Custom Resource Definition
//!
//! A ForgeMachine is one member node of a ForgeCluster. Unlike clusters,
//! machines re-run every update step on each resync.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::LifecycleStatus;

/// Role a machine plays in its cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MachineRole {
    /// Runs the control plane components
    ControlPlane,
    /// Runs workloads only
    #[default]
    Worker,
}

impl std::fmt::Display for MachineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "controlPlane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Specification for a ForgeMachine
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeforge.dev",
    version = "v1alpha1",
    kind = "ForgeMachine",
    plural = "forgemachines",
    shortname = "fm",
    status = "LifecycleStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster"}"#,
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.role"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ForgeMachineSpec {
    /// Name of the ForgeCluster this machine belongs to
    pub cluster: String,

    /// Name of the provider whose step lists drive this machine
    pub provider: String,

    /// Role of the machine in its cluster
    #[serde(default)]
    pub role: MachineRole,

    /// Address used to reach the machine
    pub address: String,
}

impl ForgeMachineSpec {
    /// Validate the machine specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.cluster.is_empty() {
            return Err(crate::Error::validation("machine must reference a cluster"));
        }
        if self.provider.is_empty() {
            return Err(crate::Error::validation("provider cannot be empty"));
        }
        if self.address.is_empty() {
            return Err(crate::Error::validation("machine address cannot be empty"));
        }
        Ok(())
    }
}
