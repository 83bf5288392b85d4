//! ForgeCluster Custom Resource Definition
//!
//! A ForgeCluster is a remote cluster driven through the provider's create
//! steps until it is Running, then kept up to date by selective updates.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{LifecycleStatus, SecretRef};

/// Specification for a ForgeCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeforge.dev",
    version = "v1alpha1",
    kind = "ForgeCluster",
    plural = "forgeclusters",
    shortname = "fc",
    status = "LifecycleStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ForgeClusterSpec {
    /// Name of the provider whose step lists drive this cluster
    pub provider: String,

    /// Kubernetes version to install
    pub kubernetes_version: String,

    /// Secret holding the admin kubeconfig once the control plane exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret: Option<SecretRef>,
}

impl ForgeClusterSpec {
    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.provider.trim().is_empty() {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.provider",
                "provider cannot be empty",
            ));
        }
        if self.kubernetes_version.trim().is_empty() {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.kubernetesVersion",
                "kubernetes version cannot be empty",
            ));
        }
        Ok(())
    }
}
