//! Built-in steps
//!
//! Steps every provider can reuse to tie a cluster's lifecycle to the
//! cluster registry, plus the `external` provider built from them, which
//! adopts clusters provisioned outside Kubeforge.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use kubeforge_common::crd::{ForgeCluster, ForgeMachine};
use kubeforge_common::{Error, Result};
use kubeforge_engine::{Step, StepContext, StepHandler, StepRegistry};
use kubeforge_registry::{ClusterRegistry, Credential};

use crate::client::KubeClient;

/// Provider adopting existing clusters: register on create, deregister on
/// delete
pub const EXTERNAL_PROVIDER: &str = "external";
/// Registers the cluster's connection
pub const REGISTER_CLUSTER_STEP: &str = "register-cluster";
/// Rebuilds the cluster's connection from the current kubeconfig
pub const REFRESH_CONNECTION_STEP: &str = "refresh-connection";
/// Removes the cluster's connection
pub const DEREGISTER_CLUSTER_STEP: &str = "deregister-cluster";
/// Waits until the machine's node appears in its cluster's cache
pub const AWAIT_NODE_STEP: &str = "await-node";

/// Reads the cluster's kubeconfig Secret and registers a connection
pub struct RegisterCluster {
    kube: Arc<dyn KubeClient>,
    clusters: Arc<ClusterRegistry>,
    namespace: String,
}

impl RegisterCluster {
    /// Create the step; `namespace` is used when the Secret reference has
    /// none
    pub fn new(
        kube: Arc<dyn KubeClient>,
        clusters: Arc<ClusterRegistry>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kube,
            clusters,
            namespace: namespace.into(),
        }
    }

    async fn credential(&self, cluster: &ForgeCluster) -> Result<Credential> {
        let name = cluster.name_any();
        let secret = cluster.spec.kubeconfig_secret.as_ref().ok_or_else(|| {
            Error::validation_for_field(
                &name,
                "spec.kubeconfigSecret",
                "a kubeconfig secret is required to register the cluster",
            )
        })?;
        let namespace = secret.namespace.as_deref().unwrap_or(&self.namespace);
        let bytes = self
            .kube
            .get_secret_value(&secret.name, namespace, &secret.key)
            .await?
            .ok_or_else(|| {
                Error::validation_for_field(
                    &name,
                    "spec.kubeconfigSecret",
                    format!(
                        "key '{}' not found in secret {}/{}",
                        secret.key, namespace, secret.name
                    ),
                )
            })?;
        Credential::from_bytes(&name, &bytes)
    }
}

#[async_trait]
impl StepHandler<ForgeCluster> for RegisterCluster {
    async fn run(&self, ctx: &StepContext, cluster: &mut ForgeCluster) -> Result<()> {
        let credential = self.credential(cluster).await?;
        let connection = self
            .clusters
            .add_new_cluster(ctx.cancellation(), ctx.object(), credential)
            .await?;
        info!(cluster = %connection.name(), status = %connection.status(), "cluster connection ready");
        Ok(())
    }
}

/// Replaces the cluster's connection, picking up a rotated kubeconfig
pub struct RefreshConnection {
    register: RegisterCluster,
}

impl RefreshConnection {
    /// Create the step
    pub fn new(
        kube: Arc<dyn KubeClient>,
        clusters: Arc<ClusterRegistry>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            register: RegisterCluster::new(kube, clusters, namespace),
        }
    }
}

#[async_trait]
impl StepHandler<ForgeCluster> for RefreshConnection {
    async fn run(&self, ctx: &StepContext, cluster: &mut ForgeCluster) -> Result<()> {
        // Resolve the credential first so a bad Secret keeps the old connection
        let credential = self.register.credential(cluster).await?;
        self.register.clusters.delete(ctx.object()).await;
        self.register
            .clusters
            .add_new_cluster(ctx.cancellation(), ctx.object(), credential)
            .await?;
        info!(cluster = %ctx.object(), "cluster connection refreshed");
        Ok(())
    }
}

/// Removes the cluster's connection; a missing connection is fine
pub struct DeregisterCluster {
    clusters: Arc<ClusterRegistry>,
}

impl DeregisterCluster {
    /// Create the step
    pub fn new(clusters: Arc<ClusterRegistry>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl StepHandler<ForgeCluster> for DeregisterCluster {
    async fn run(&self, ctx: &StepContext, _cluster: &mut ForgeCluster) -> Result<()> {
        self.clusters.delete(ctx.object()).await;
        Ok(())
    }
}

/// Succeeds once a node named after the machine is in its cluster's cache
pub struct AwaitNode {
    clusters: Arc<ClusterRegistry>,
}

impl AwaitNode {
    /// Create the step
    pub fn new(clusters: Arc<ClusterRegistry>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl StepHandler<ForgeMachine> for AwaitNode {
    async fn run(&self, ctx: &StepContext, machine: &mut ForgeMachine) -> Result<()> {
        let cluster = &machine.spec.cluster;
        let connection = self.clusters.get(cluster).await?;
        let cache = connection
            .cache()
            .ok_or_else(|| Error::connection(cluster, "connection has no node cache"))?;
        match cache.get_node(ctx.object())? {
            Some(_) => Ok(()),
            None => Err(Error::internal_with_context(
                AWAIT_NODE_STEP,
                format!("node {} has not joined cluster {}", ctx.object(), cluster),
            )),
        }
    }
}

/// Steps of the `external` ForgeCluster provider
pub fn external_cluster_steps(
    kube: Arc<dyn KubeClient>,
    clusters: Arc<ClusterRegistry>,
    namespace: &str,
) -> Result<StepRegistry<ForgeCluster>> {
    StepRegistry::builder(EXTERNAL_PROVIDER)
        .create(Step::new(
            REGISTER_CLUSTER_STEP,
            RegisterCluster::new(Arc::clone(&kube), Arc::clone(&clusters), namespace),
        ))
        .update(Step::new(
            REFRESH_CONNECTION_STEP,
            RefreshConnection::new(kube, Arc::clone(&clusters), namespace),
        ))
        .delete(Step::new(
            DEREGISTER_CLUSTER_STEP,
            DeregisterCluster::new(clusters),
        ))
        .build()
}

/// Steps of the `external` ForgeMachine provider
pub fn external_machine_steps(clusters: Arc<ClusterRegistry>) -> Result<StepRegistry<ForgeMachine>> {
    StepRegistry::builder(EXTERNAL_PROVIDER)
        .create(Step::new(AWAIT_NODE_STEP, AwaitNode::new(Arc::clone(&clusters))))
        .update(Step::new(AWAIT_NODE_STEP, AwaitNode::new(clusters)))
        .build()
}
