//! Controller runner - builds the controller and health-loop futures
//!
//! Each `build_*` function returns boxed futures the binary joins. Shutdown
//! flows through the context's cancellation token: the signal watcher
//! cancels it, the health loop stops every cache watch, and the controllers
//! drain through `shutdown_on_signal`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubeforge_common::config::EnvConfig;
use kubeforge_common::crd::{ForgeCluster, ForgeMachine};
use kubeforge_common::{Result, FIELD_MANAGER};
use kubeforge_engine::ProviderRegistry;

use crate::context::Context;
use crate::controller::{cluster, machine};
use crate::steps::{external_cluster_steps, external_machine_steps};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// A boxed future driven until shutdown
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build a context with the built-in `external` providers registered
pub fn external_context(
    client: Client,
    env: &dyn EnvConfig,
    shutdown: CancellationToken,
) -> Result<Context> {
    let mut builder = Context::builder(client).from_env(env).shutdown(shutdown);
    let kube = builder.kube();
    let clusters = builder.clusters();
    let namespace = builder.system_namespace().to_string();

    let cluster_providers = ProviderRegistry::new().with(external_cluster_steps(
        kube,
        Arc::clone(&clusters),
        &namespace,
    )?)?;
    let machine_providers = ProviderRegistry::new().with(external_machine_steps(clusters)?)?;

    Ok(builder
        .cluster_providers(cluster_providers)
        .machine_providers(machine_providers)
        .build())
}

/// Build the ForgeCluster and ForgeMachine controller futures
pub fn build_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    let clusters: Api<ForgeCluster> = Api::all(client.clone());
    let machines: Api<ForgeMachine> = Api::all(client);

    info!(
        cluster_providers = ?ctx.cluster_providers.providers(),
        machine_providers = ?ctx.machine_providers.providers(),
        "starting controllers"
    );
    info!("- ForgeCluster controller");
    info!("- ForgeMachine controller");

    let cluster_ctrl = Controller::new(
        clusters,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(cluster::reconcile, cluster::error_policy, Arc::clone(&ctx))
    .for_each(log_reconcile_result("Cluster"));

    let machine_ctrl = Controller::new(
        machines,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(machine::reconcile, machine::error_policy, ctx)
    .for_each(log_reconcile_result("Machine"));

    vec![Box::pin(cluster_ctrl), Box::pin(machine_ctrl)]
}

/// Build the registry health loop future
///
/// Runs until the context's shutdown token fires, then stops every cache.
pub fn build_health_loop(ctx: Arc<Context>) -> ControllerFuture {
    Box::pin(async move {
        let shutdown = ctx.shutdown.clone();
        ctx.clusters.start(shutdown).await;
    })
}

/// Cancel `shutdown` on SIGINT or SIGTERM
///
/// Returns early if the token is cancelled elsewhere.
pub async fn watch_signals(shutdown: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    shutdown.cancel();
}

/// Run every controller and the health loop until shutdown
pub async fn run(client: Client, ctx: Arc<Context>) {
    let mut futures = build_controllers(client, Arc::clone(&ctx));
    futures.push(build_health_loop(Arc::clone(&ctx)));

    let signals = tokio::spawn(watch_signals(ctx.shutdown.clone()));
    futures::future::join_all(futures).await;

    ctx.shutdown.cancel();
    signals.abort();
    info!("all controllers stopped");
}

/// Install or update the ForgeCluster and ForgeMachine CRDs
///
/// Uses server-side apply so the installed versions always match the
/// operator's.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [ForgeCluster::crd(), ForgeMachine::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

/// Render both CRDs as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let docs = [ForgeCluster::crd(), ForgeMachine::crd()]
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
    Ok(docs.join("---\n"))
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use crate::client::MockKubeClient;
    use crate::testing::{registry, FakeConnector};

    fn context() -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(MockKubeClient::new()),
            ProviderRegistry::new(),
            ProviderRegistry::new(),
            registry(FakeConnector::default()),
            BTreeSet::new(),
        ))
    }

    #[tokio::test]
    async fn test_health_loop_stops_on_shutdown() {
        let ctx = context();
        let health = tokio::spawn(build_health_loop(Arc::clone(&ctx)));

        ctx.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), health)
            .await
            .expect("health loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_watch_signals_returns_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), watch_signals(token))
            .await
            .expect("signal watcher should return");
    }

    #[tokio::test]
    async fn test_log_reconcile_result_is_ready() {
        log_reconcile_result::<&str, &str>("Cluster")(Ok("done")).await;
        log_reconcile_result::<&str, &str>("Cluster")(Err("boom")).await;
    }

    #[test]
    fn test_crd_manifests_cover_both_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("forgeclusters.kubeforge.dev"));
        assert!(yaml.contains("forgemachines.kubeforge.dev"));
        assert_eq!(yaml.matches("---\n").count(), 1);
    }
}
