//! Shared controller context
//!
//! Use [`ContextBuilder`] to construct instances:
//!
//! ```text
//! let ctx = Context::builder(client)
//!     .from_env(&OsEnvConfig)
//!     .cluster_providers(clusters)
//!     .machine_providers(machines)
//!     .build();
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use kubeforge_common::config::{self, EnvConfig};
use kubeforge_common::crd::{ForgeCluster, ForgeMachine};
use kubeforge_common::KUBEFORGE_SYSTEM_NAMESPACE;
use kubeforge_engine::{Engine, ProviderRegistry};
use kubeforge_registry::{ClusterRegistry, KubeConnector, RegistryConfig};

use crate::client::{KubeClient, KubeClientImpl};
use crate::skip_list::ConfigMapSkipList;

/// State shared by the ForgeCluster and ForgeMachine controllers
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Step engine
    pub engine: Engine,
    /// Step registries for ForgeCluster providers
    pub cluster_providers: ProviderRegistry<ForgeCluster>,
    /// Step registries for ForgeMachine providers
    pub machine_providers: ProviderRegistry<ForgeMachine>,
    /// Connections to managed clusters
    pub clusters: Arc<ClusterRegistry>,
    /// System namespace (skip-list ConfigMap, default credential namespace)
    pub namespace: String,
    /// Fires on operator shutdown
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with a mock client and a static
    /// skip-list
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        cluster_providers: ProviderRegistry<ForgeCluster>,
        machine_providers: ProviderRegistry<ForgeMachine>,
        clusters: Arc<ClusterRegistry>,
        skip: BTreeSet<String>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            kube,
            engine: Engine::new(Arc::new(kubeforge_engine::StaticSkipList::new(skip)))
                .with_shutdown(shutdown.clone()),
            cluster_providers,
            machine_providers,
            clusters,
            namespace: KUBEFORGE_SYSTEM_NAMESPACE.to_string(),
            shutdown,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    cluster_providers: ProviderRegistry<ForgeCluster>,
    machine_providers: ProviderRegistry<ForgeMachine>,
    clusters: Option<Arc<ClusterRegistry>>,
    registry_config: RegistryConfig,
    namespace: String,
    static_skip: BTreeSet<String>,
    shutdown: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            cluster_providers: ProviderRegistry::new(),
            machine_providers: ProviderRegistry::new(),
            clusters: None,
            registry_config: RegistryConfig::default(),
            namespace: KUBEFORGE_SYSTEM_NAMESPACE.to_string(),
            static_skip: BTreeSet::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Read namespace, static skip-list, and registry timings from the
    /// environment
    pub fn from_env(mut self, env: &dyn EnvConfig) -> Self {
        self.namespace = config::namespace(env);
        self.static_skip = config::skip_steps(env);
        self.registry_config = RegistryConfig::from_env(env);
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Set the ForgeCluster provider registry
    pub fn cluster_providers(mut self, providers: ProviderRegistry<ForgeCluster>) -> Self {
        self.cluster_providers = providers;
        self
    }

    /// Set the ForgeMachine provider registry
    pub fn machine_providers(mut self, providers: ProviderRegistry<ForgeMachine>) -> Self {
        self.machine_providers = providers;
        self
    }

    /// Use an existing cluster registry (shared with built-in steps)
    pub fn cluster_registry(mut self, clusters: Arc<ClusterRegistry>) -> Self {
        self.clusters = Some(clusters);
        self
    }

    /// Set the system namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the shutdown token propagated into step contexts
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Kubernetes client the built context will use
    ///
    /// Lets callers build steps that share it before calling
    /// [`build`](Self::build).
    pub fn kube(&mut self) -> Arc<dyn KubeClient> {
        let client = self.client.clone();
        Arc::clone(
            self.kube
                .get_or_insert_with(|| Arc::new(KubeClientImpl::new(client)) as Arc<dyn KubeClient>),
        )
    }

    /// Cluster registry the built context will use
    pub fn clusters(&mut self) -> Arc<ClusterRegistry> {
        let config = self.registry_config.clone();
        Arc::clone(self.clusters.get_or_insert_with(|| {
            Arc::new(ClusterRegistry::new(Arc::new(KubeConnector::default()), config))
        }))
    }

    /// System namespace the built context will use
    pub fn system_namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the Context
    pub fn build(mut self) -> Context {
        let kube = self.kube();
        let clusters = self.clusters();
        let skip = ConfigMapSkipList::new(Arc::clone(&kube), self.namespace.clone(), self.static_skip);
        Context {
            kube,
            engine: Engine::new(Arc::new(skip)).with_shutdown(self.shutdown.clone()),
            cluster_providers: self.cluster_providers,
            machine_providers: self.machine_providers,
            clusters,
            namespace: self.namespace,
            shutdown: self.shutdown,
        }
    }
}
