//! Kubernetes operations used by the reconcilers
//!
//! Abstracted behind [`KubeClient`] so reconcilers can be tested against
//! mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubeforge_common::crd::{ForgeCluster, ForgeMachine, LifecycleStatus};
use kubeforge_common::{Error, Result, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for the controllers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Replace the status of a ForgeCluster
    async fn patch_cluster_status(&self, name: &str, status: &LifecycleStatus) -> Result<()>;

    /// Replace the status of a ForgeMachine
    async fn patch_machine_status(&self, name: &str, status: &LifecycleStatus) -> Result<()>;

    /// Add a finalizer to a ForgeCluster if missing
    async fn add_cluster_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Remove a finalizer from a ForgeCluster
    async fn remove_cluster_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Add a finalizer to a ForgeMachine if missing
    async fn add_machine_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Remove a finalizer from a ForgeMachine
    async fn remove_machine_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Remove an annotation from a ForgeCluster
    async fn remove_cluster_annotation(&self, name: &str, annotation: &str) -> Result<()>;

    /// Read one key of a Secret, `None` if the Secret or key is missing
    async fn get_secret_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>>;

    /// Read a ConfigMap's data, `None` if it does not exist
    async fn get_config_map_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}

/// Merge patch replacing an object's status
///
/// Merge patch leaves omitted keys untouched, so a cleared failure mirror is
/// sent as explicit nulls.
pub fn status_patch(status: &LifecycleStatus) -> Result<serde_json::Value> {
    let mut body = serde_json::to_value(status)
        .map_err(|e| Error::internal_with_context("status", e.to_string()))?;
    if let Some(fields) = body.as_object_mut() {
        for key in ["reason", "message"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({ "status": body }))
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_finalizers<K>(api: &Api<K>, name: &str, finalizers: Vec<String>) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let object = api.get(name).await?;
        let mut finalizers = object.meta().finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        Self::patch_finalizers(api, name, finalizers).await
    }

    async fn remove_finalizer<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let object = match api.get_opt(name).await? {
            Some(object) => object,
            None => {
                debug!(name = %name, "object already gone, no finalizer to remove");
                return Ok(());
            }
        };
        let finalizers: Vec<String> = object
            .meta()
            .finalizers
            .as_ref()
            .map(|f| f.iter().filter(|s| *s != finalizer).cloned().collect())
            .unwrap_or_default();
        Self::patch_finalizers(api, name, finalizers).await
    }

    async fn patch_status<K>(api: &Api<K>, name: &str, status: &LifecycleStatus) -> Result<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let status_patch = status_patch(status)?;
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_cluster_status(&self, name: &str, status: &LifecycleStatus) -> Result<()> {
        let api: Api<ForgeCluster> = Api::all(self.client.clone());
        Self::patch_status(&api, name, status).await
    }

    async fn patch_machine_status(&self, name: &str, status: &LifecycleStatus) -> Result<()> {
        let api: Api<ForgeMachine> = Api::all(self.client.clone());
        Self::patch_status(&api, name, status).await
    }

    async fn add_cluster_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let api: Api<ForgeCluster> = Api::all(self.client.clone());
        Self::add_finalizer(&api, name, finalizer).await
    }

    async fn remove_cluster_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let api: Api<ForgeCluster> = Api::all(self.client.clone());
        Self::remove_finalizer(&api, name, finalizer).await
    }

    async fn add_machine_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let api: Api<ForgeMachine> = Api::all(self.client.clone());
        Self::add_finalizer(&api, name, finalizer).await
    }

    async fn remove_machine_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let api: Api<ForgeMachine> = Api::all(self.client.clone());
        Self::remove_finalizer(&api, name, finalizer).await
    }

    async fn remove_cluster_annotation(&self, name: &str, annotation: &str) -> Result<()> {
        let api: Api<ForgeCluster> = Api::all(self.client.clone());
        // A null value deletes the key under JSON merge patch
        let patch = serde_json::json!({
            "metadata": {
                "annotations": { annotation: null }
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_secret_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get_opt(name).await?;
        Ok(secret
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(key))
            .map(|bytes| bytes.0))
    }

    async fn get_config_map_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(name).await?;
        Ok(config_map.map(|cm| cm.data.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeforge_common::crd::Phase;
    use kubeforge_common::ManagedObject;

    #[test]
    fn test_status_patch_nulls_cleared_failure() {
        let mut machine = kubeforge_common::crd::ForgeMachine::new(
            "worker-0",
            kubeforge_common::crd::ForgeMachineSpec {
                cluster: "prod".to_string(),
                provider: "scripted".to_string(),
                role: Default::default(),
                address: "10.0.0.10".to_string(),
            },
        );
        machine.set_phase(Phase::Running);
        machine.set_failure("Failed", "upgrade failed");
        machine.clear_failure();

        let patch = status_patch(machine.status.as_ref().unwrap()).unwrap();
        let status = &patch["status"];
        assert!(status["reason"].is_null());
        assert!(status["message"].is_null());
        assert!(status.as_object().unwrap().contains_key("reason"));
        assert!(status.as_object().unwrap().contains_key("message"));
        assert_eq!(status["phase"], "Running");
    }

    #[test]
    fn test_status_patch_keeps_recorded_failure() {
        let mut status = LifecycleStatus::with_phase(Phase::Pending);
        status.reason = Some("Failed".to_string());
        status.message = Some("bootstrap failed".to_string());

        let patch = status_patch(&status).unwrap();
        assert_eq!(patch["status"]["reason"], "Failed");
        assert_eq!(patch["status"]["message"], "bootstrap failed");
    }
}
