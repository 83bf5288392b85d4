//! Native access to a managed cluster
//!
//! [`ClusterApi`] is the seam between the registry and a real API server:
//! a liveness probe for the health sweep, and a long-running cache watch.
//! [`KubeClusterApi`] implements it with kube-rs, keeping a reflector store
//! of Nodes that backs the [`CachedClient`] read path.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use kubeforge_common::{Error, Result};

/// Liveness endpoint used by the health sweep
pub const LIVEZ_PATH: &str = "/livez";

/// Operations the registry needs from a managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Probe the API server's liveness endpoint
    async fn probe(&self) -> Result<()>;

    /// Run the cache watch until `cancel` fires
    ///
    /// Must send on `synced` once the initial list has been loaded. Dropping
    /// `synced` without sending tells the caller the sync failed.
    async fn sync_cache(
        &self,
        cancel: CancellationToken,
        synced: oneshot::Sender<()>,
    ) -> Result<()>;

    /// Cache-backed read client, if this implementation keeps one
    fn cache(&self) -> Option<CachedClient>;
}

type NodeStore = Arc<RwLock<Option<Store<Node>>>>;

/// Read path served from a connection's local cache
///
/// Reads fail until the cache watch has completed its initial sync, and
/// again once the watch is stopped.
#[derive(Clone)]
pub struct CachedClient {
    cluster: String,
    nodes: NodeStore,
}

impl CachedClient {
    /// Serve reads from an existing reflector store
    pub fn from_store(cluster: impl Into<String>, store: Store<Node>) -> Self {
        Self {
            cluster: cluster.into(),
            nodes: Arc::new(RwLock::new(Some(store))),
        }
    }

    fn store(&self) -> Result<Store<Node>> {
        self.nodes
            .read()
            .clone()
            .ok_or_else(|| Error::connection(&self.cluster, "cache is not running"))
    }

    /// Cluster this client reads from
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// All cached nodes
    pub fn list_nodes(&self) -> Result<Vec<Arc<Node>>> {
        Ok(self.store()?.state())
    }

    /// A cached node by name
    pub fn get_node(&self, name: &str) -> Result<Option<Arc<Node>>> {
        Ok(self.store()?.get(&ObjectRef::new(name)))
    }

    /// Count of cached nodes reporting `Ready=True`
    pub fn ready_node_count(&self) -> Result<usize> {
        Ok(self
            .list_nodes()?
            .iter()
            .filter(|node| is_node_ready(node))
            .count())
    }
}

fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// [`ClusterApi`] backed by a kube-rs client
pub struct KubeClusterApi {
    cluster: String,
    client: Client,
    nodes: NodeStore,
}

impl KubeClusterApi {
    /// Wrap a native client for the named cluster
    pub fn new(cluster: impl Into<String>, client: Client) -> Self {
        Self {
            cluster: cluster.into(),
            client,
            nodes: Arc::new(RwLock::new(None)),
        }
    }

    /// Native client, for writes
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn probe(&self) -> Result<()> {
        let request = http::Request::get(LIVEZ_PATH)
            .body(Vec::new())
            .map_err(|e| Error::connection(&self.cluster, format!("invalid probe request: {e}")))?;
        let body = self
            .client
            .request_text(request)
            .await
            .map_err(|e| Error::connection(&self.cluster, format!("liveness probe failed: {e}")))?;
        debug!(cluster = %self.cluster, response = %body.trim(), "liveness probe ok");
        Ok(())
    }

    async fn sync_cache(
        &self,
        cancel: CancellationToken,
        synced: oneshot::Sender<()>,
    ) -> Result<()> {
        let (reader, writer) = reflector::store::<Node>();
        let api: Api<Node> = Api::all(self.client.clone());
        let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
            .default_backoff()
            .applied_objects();
        tokio::pin!(stream);

        let ready = reader.wait_until_ready();
        tokio::pin!(ready);
        let mut synced = Some(synced);

        info!(cluster = %self.cluster, "starting node cache watch");
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(cluster = %self.cluster, "node cache watch cancelled");
                    break Ok(());
                }
                res = &mut ready, if synced.is_some() => {
                    match res {
                        Ok(()) => {
                            *self.nodes.write() = Some(reader.clone());
                            if let Some(tx) = synced.take() {
                                let _ = tx.send(());
                            }
                            info!(cluster = %self.cluster, nodes = reader.len(), "node cache synced");
                        }
                        Err(e) => {
                            break Err(Error::connection(
                                &self.cluster,
                                format!("node cache writer dropped: {e}"),
                            ));
                        }
                    }
                }
                event = stream.next() => match event {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(cluster = %self.cluster, error = %e, "node cache watch error");
                    }
                    None => {
                        break Err(Error::connection(&self.cluster, "node cache watch ended"));
                    }
                },
            }
        };

        *self.nodes.write() = None;
        result
    }

    fn cache(&self) -> Option<CachedClient> {
        Some(CachedClient {
            cluster: self.cluster.clone(),
            nodes: Arc::clone(&self.nodes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use kube::api::ObjectMeta;
    use kube::runtime::watcher::Event;

    fn node(name: &str, ready: bool) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: (if ready { "True" } else { "False" }).to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn cached(nodes: &[Node]) -> CachedClient {
        let (reader, mut writer) = reflector::store::<Node>();
        writer.apply_watcher_event(&Event::Init);
        for n in nodes {
            writer.apply_watcher_event(&Event::InitApply(n.clone()));
        }
        writer.apply_watcher_event(&Event::InitDone);
        CachedClient::from_store("c1", reader)
    }

    #[test]
    fn test_reads_before_sync_fail() {
        let client = CachedClient {
            cluster: "c1".to_string(),
            nodes: Arc::new(RwLock::new(None)),
        };
        let err = client.list_nodes().unwrap_err();
        assert_eq!(err.cluster(), Some("c1"));
        assert!(client.get_node("n1").is_err());
    }

    #[test]
    fn test_reads_from_store() {
        let client = cached(&[node("cp-0", true), node("worker-0", false)]);
        assert_eq!(client.cluster(), "c1");
        assert_eq!(client.list_nodes().unwrap().len(), 2);
        assert!(client.get_node("cp-0").unwrap().is_some());
        assert!(client.get_node("missing").unwrap().is_none());
        assert_eq!(client.ready_node_count().unwrap(), 1);
    }

    #[test]
    fn test_node_without_status_is_not_ready() {
        let mut n = node("n", true);
        n.status = None;
        assert!(!is_node_ready(&n));
    }
}
