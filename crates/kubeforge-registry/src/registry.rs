//! The cluster registry
//!
//! Connections are kept in a vector sorted by name behind an async
//! reader/writer lock: lookups and enumeration share it, add and delete take
//! it exclusively. The health sweep works on a snapshot and only touches each
//! connection's atomic status, so it never holds the lock while probing.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubeforge_common::{Error, Result};

use crate::config::RegistryConfig;
use crate::connection::{ClusterConnection, ConnectionStatus};
use crate::connector::ClusterConnector;
use crate::credential::Credential;

/// Name that selects every usable connection in [`ClusterRegistry::get_all`]
pub const ALL_CLUSTERS: &str = "all";

/// Result of one health sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Connections whose probe succeeded
    pub ready: usize,
    /// Connections whose probe failed
    pub offline: usize,
    /// Connections left alone because they are under maintenance
    pub maintaining: usize,
}

/// Concurrent store of cluster connections plus their health loop
pub struct ClusterRegistry {
    connections: RwLock<Vec<Arc<ClusterConnection>>>,
    connector: Arc<dyn ClusterConnector>,
    config: RegistryConfig,
}

impl ClusterRegistry {
    /// Create an empty registry
    pub fn new(connector: Arc<dyn ClusterConnector>, config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            connector,
            config,
        }
    }

    /// Timing configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert a connection, keeping the list sorted by name
    ///
    /// Fails with `DuplicateCluster` if the name is taken; the registry is
    /// left unchanged.
    pub async fn add(&self, connection: Arc<ClusterConnection>) -> Result<()> {
        let mut connections = self.connections.write().await;
        match connections.binary_search_by(|c| c.name().cmp(connection.name())) {
            Ok(_) => Err(Error::duplicate_cluster(connection.name())),
            Err(index) => {
                info!(cluster = %connection.name(), "cluster registered");
                connections.insert(index, connection);
                Ok(())
            }
        }
    }

    async fn find(&self, name: &str) -> Option<Arc<ClusterConnection>> {
        let connections = self.connections.read().await;
        connections
            .binary_search_by(|c| c.name().cmp(name))
            .ok()
            .map(|index| Arc::clone(&connections[index]))
    }

    /// Look up a usable connection by exact name
    ///
    /// # Errors
    ///
    /// `ClusterNotFound` if no such connection exists, `ClusterOffline` if its
    /// last health check failed.
    pub async fn get(&self, name: &str) -> Result<Arc<ClusterConnection>> {
        let connection = self
            .find(name)
            .await
            .ok_or_else(|| Error::cluster_not_found(name))?;
        if !connection.status().is_usable() {
            return Err(Error::cluster_offline(name));
        }
        Ok(connection)
    }

    /// Usable connections matching `names`
    ///
    /// No names, or any name equal to [`ALL_CLUSTERS`], selects every usable
    /// connection. Otherwise only exact matches are returned, in name order;
    /// names without a usable match are left out.
    pub async fn get_all(&self, names: &[&str]) -> Vec<Arc<ClusterConnection>> {
        let select_all = names.is_empty() || names.contains(&ALL_CLUSTERS);
        self.connections
            .read()
            .await
            .iter()
            .filter(|c| c.status().is_usable())
            .filter(|c| select_all || names.contains(&c.name()))
            .cloned()
            .collect()
    }

    /// Stop and remove a connection
    ///
    /// Returns false if nothing was registered under that name.
    pub async fn delete(&self, name: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.binary_search_by(|c| c.name().cmp(name)) {
            Ok(index) => {
                let connection = connections.remove(index);
                connection.stop();
                info!(cluster = %name, "cluster deregistered");
                true
            }
            Err(_) => {
                debug!(cluster = %name, "cluster not registered, nothing to delete");
                false
            }
        }
    }

    /// Register a cluster unless it already is
    ///
    /// An existing connection (in any status) is returned unchanged.
    /// Otherwise a connection is built from the credential, its cache is
    /// started (bounded by the configured sync timeout and `ctx`), and it is
    /// added. If another caller registered the same name meanwhile, the new
    /// connection is stopped and the winner is returned.
    pub async fn add_new_cluster(
        &self,
        ctx: &CancellationToken,
        name: &str,
        credential: Credential,
    ) -> Result<Arc<ClusterConnection>> {
        if let Some(existing) = self.find(name).await {
            debug!(cluster = %name, "cluster already registered");
            return Ok(existing);
        }

        let api = self.connector.connect(name, &credential).await?;
        let connection = Arc::new(ClusterConnection::new(name, credential, api));
        connection
            .start_cache(ctx, self.config.cache_sync_timeout)
            .await?;

        match self.add(Arc::clone(&connection)).await {
            Ok(()) => Ok(connection),
            Err(Error::DuplicateCluster { .. }) => {
                connection.stop();
                debug!(cluster = %name, "lost registration race, using existing connection");
                self.find(name)
                    .await
                    .ok_or_else(|| Error::cluster_not_found(name))
            }
            Err(e) => {
                connection.stop();
                Err(e)
            }
        }
    }

    /// Set a connection's status by name, returning the previous status
    ///
    /// Used to put a connection into or out of maintenance.
    pub async fn set_status(&self, name: &str, status: ConnectionStatus) -> Result<ConnectionStatus> {
        let connection = self
            .find(name)
            .await
            .ok_or_else(|| Error::cluster_not_found(name))?;
        let previous = connection.set_status(status);
        if previous != status {
            info!(cluster = %name, from = %previous, to = %status, "cluster status changed");
        }
        Ok(previous)
    }

    /// Probe every connection once and update its status
    ///
    /// Connections under maintenance are skipped. Probes run concurrently,
    /// each bounded by the configured probe timeout; a failing probe marks
    /// its connection Offline and never aborts the sweep.
    pub async fn check_health(&self) -> SweepSummary {
        let snapshot: Vec<_> = self.connections.read().await.clone();
        let timeout = self.config.probe_timeout;

        let results = join_all(snapshot.iter().map(|connection| async move {
            let observed = connection.status();
            if observed == ConnectionStatus::Maintaining {
                return ConnectionStatus::Maintaining;
            }
            let next = match connection.probe(timeout).await {
                Ok(()) => ConnectionStatus::Ready,
                Err(e) => {
                    warn!(cluster = %connection.name(), error = %e, "health check failed");
                    ConnectionStatus::Offline
                }
            };
            // A status set while the probe was in flight wins over the probe
            match connection.transition_status(observed, next) {
                Ok(()) => {
                    if observed != next {
                        info!(cluster = %connection.name(), from = %observed, to = %next, "cluster status changed");
                    }
                    next
                }
                Err(current) => {
                    debug!(cluster = %connection.name(), status = %current, "status changed during probe, keeping it");
                    current
                }
            }
        }))
        .await;

        let mut summary = SweepSummary::default();
        for status in results {
            match status {
                ConnectionStatus::Ready => summary.ready += 1,
                ConnectionStatus::Offline => summary.offline += 1,
                ConnectionStatus::Maintaining => summary.maintaining += 1,
            }
        }
        debug!(
            ready = summary.ready,
            offline = summary.offline,
            maintaining = summary.maintaining,
            "health sweep done"
        );
        summary
    }

    /// Run the health sweep every interval until `ctx` is cancelled, then
    /// stop every connection
    pub async fn start(&self, ctx: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        info!(
            interval_secs = self.config.health_check_interval.as_secs(),
            "cluster health loop started"
        );
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = interval.tick() => {
                    self.check_health().await;
                }
            }
        }

        info!("cluster health loop stopping");
        self.stop().await;
    }

    /// Stop every connection's cache watch
    pub async fn stop(&self) {
        for connection in self.connections.read().await.iter() {
            connection.stop();
        }
    }

    /// Registered cluster names, sorted
    pub async fn names(&self) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Number of registered connections, in any status
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns true if nothing is registered
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
