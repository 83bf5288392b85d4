//! Fixtures shared by the operator's unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::ObjectMeta;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::Event;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use kubeforge_common::crd::{ForgeCluster, ForgeClusterSpec, ForgeMachine, ForgeMachineSpec, MachineRole};
use kubeforge_common::Result;
use kubeforge_registry::{
    CachedClient, ClusterApi, ClusterConnector, ClusterRegistry, Credential, RegistryConfig,
};

/// Cluster API whose cache syncs immediately and holds a fixed node list
pub(crate) struct FakeApi {
    cluster: String,
    nodes: Store<Node>,
}

impl FakeApi {
    fn new(cluster: &str, node_names: &[String]) -> Self {
        let (reader, mut writer) = reflector::store::<Node>();
        writer.apply_watcher_event(&Event::Init);
        for name in node_names {
            let node = Node {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..Default::default()
                },
                ..Default::default()
            };
            writer.apply_watcher_event(&Event::InitApply(node));
        }
        writer.apply_watcher_event(&Event::InitDone);
        Self {
            cluster: cluster.to_string(),
            nodes: reader,
        }
    }
}

#[async_trait]
impl ClusterApi for FakeApi {
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn sync_cache(
        &self,
        cancel: CancellationToken,
        synced: oneshot::Sender<()>,
    ) -> Result<()> {
        let _ = synced.send(());
        cancel.cancelled().await;
        Ok(())
    }

    fn cache(&self) -> Option<CachedClient> {
        Some(CachedClient::from_store(&self.cluster, self.nodes.clone()))
    }
}

/// Connector counting connects and handing out [`FakeApi`]s
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    connects: Arc<AtomicUsize>,
    nodes: Vec<String>,
}

impl FakeConnector {
    pub(crate) fn with_nodes(nodes: &[&str]) -> Self {
        Self {
            connects: Arc::default(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, cluster: &str, _credential: &Credential) -> Result<Arc<dyn ClusterApi>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeApi::new(cluster, &self.nodes)))
    }
}

pub(crate) fn registry(connector: FakeConnector) -> Arc<ClusterRegistry> {
    Arc::new(ClusterRegistry::new(
        Arc::new(connector),
        RegistryConfig {
            health_check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(1),
            cache_sync_timeout: Duration::from_secs(1),
        },
    ))
}

pub(crate) fn sample_cluster(name: &str, provider: &str) -> ForgeCluster {
    ForgeCluster::new(
        name,
        ForgeClusterSpec {
            provider: provider.to_string(),
            kubernetes_version: "1.32.0".to_string(),
            kubeconfig_secret: None,
        },
    )
}

pub(crate) fn sample_machine(name: &str, cluster: &str) -> ForgeMachine {
    ForgeMachine::new(
        name,
        ForgeMachineSpec {
            cluster: cluster.to_string(),
            provider: "scripted".to_string(),
            role: MachineRole::Worker,
            address: "10.0.0.10".to_string(),
        },
    )
}
