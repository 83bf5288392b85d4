//! Building native access for a newly registered cluster

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubeforge_common::Result;

use crate::api::{ClusterApi, KubeClusterApi};
use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::credential::Credential;

/// Turns a credential into native cluster access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Build native access to the named cluster
    async fn connect(&self, cluster: &str, credential: &Credential) -> Result<Arc<dyn ClusterApi>>;
}

/// Connector producing kube-rs backed [`KubeClusterApi`]s
#[derive(Clone, Debug)]
pub struct KubeConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl KubeConnector {
    /// Connector with custom client timeouts
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, cluster: &str, credential: &Credential) -> Result<Arc<dyn ClusterApi>> {
        let client = credential
            .client(cluster, self.connect_timeout, self.read_timeout)
            .await?;
        debug!(cluster = %cluster, "built native client");
        Ok(Arc::new(KubeClusterApi::new(cluster, client)))
    }
}
