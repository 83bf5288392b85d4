//! ForgeCluster reconciler
//!
//! Pending clusters advance one create step per reconcile. Running clusters
//! only do work when the update-steps annotation names steps to run; the
//! annotation is cleared once they all succeed.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use kubeforge_common::crd::ForgeCluster;
use kubeforge_common::{Error, ManagedObject, Result, CLEANUP_FINALIZER, UPDATE_STEPS_ANNOTATION};

use super::{
    attribute_to, create_action, error_action, has_cleanup_finalizer, selected_update_steps,
    FAILED_STEP_REQUEUE, RESYNC_INTERVAL,
};
use crate::context::Context;

/// Reconcile a ForgeCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ForgeCluster>, ctx: Arc<Context>) -> Result<Action> {
    let name = cluster.name_any();

    // Deletion does not depend on the spec still being valid
    if cluster.metadata.deletion_timestamp.is_some() {
        if !has_cleanup_finalizer(&cluster.metadata) {
            debug!("cluster deleting without finalizer, nothing to do");
            return Ok(Action::await_change());
        }
        match ctx.cluster_providers.resolve(&cluster.spec.provider) {
            Ok(steps) => {
                info!("running delete steps");
                let mut working = (*cluster).clone();
                ctx.engine.delete(&steps, &mut working).await?;
            }
            Err(e) => {
                warn!(error = %e, "provider not resolvable, releasing finalizer without delete steps");
            }
        }
        ctx.kube
            .remove_cluster_finalizer(&name, CLEANUP_FINALIZER)
            .await?;
        return Ok(Action::await_change());
    }

    cluster.spec.validate().map_err(|e| attribute_to(&name, e))?;
    let steps = ctx.cluster_providers.resolve(&cluster.spec.provider)?;
    let mut working = (*cluster).clone();

    if !has_cleanup_finalizer(&cluster.metadata) {
        ctx.kube.add_cluster_finalizer(&name, CLEANUP_FINALIZER).await?;
    }

    if !working.phase().is_terminal() {
        let outcome = ctx.engine.create(&steps, &mut working).await?;
        persist_status(&ctx, &cluster, &working).await?;
        return Ok(create_action(&outcome));
    }

    let selected = selected_update_steps(cluster.annotations());
    if selected.is_empty() {
        return Ok(Action::requeue(RESYNC_INTERVAL));
    }

    info!(steps = ?selected, "running selected update steps");
    let outcome = ctx
        .engine
        .update_selected(&steps, &mut working, &selected)
        .await?;
    persist_status(&ctx, &cluster, &working).await?;

    if outcome.is_success() {
        ctx.kube
            .remove_cluster_annotation(&name, UPDATE_STEPS_ANNOTATION)
            .await?;
        Ok(Action::requeue(RESYNC_INTERVAL))
    } else {
        Ok(Action::requeue(FAILED_STEP_REQUEUE))
    }
}

async fn persist_status(ctx: &Context, original: &ForgeCluster, working: &ForgeCluster) -> Result<()> {
    if working.status == original.status {
        return Ok(());
    }
    match working.status.as_ref() {
        Some(status) => {
            ctx.kube
                .patch_cluster_status(&original.name_any(), status)
                .await
        }
        None => Ok(()),
    }
}

/// Error policy for the ForgeCluster controller
pub fn error_policy(cluster: Arc<ForgeCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    error_action(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kubeforge_common::crd::{ConditionStatus, LifecycleStatus, Phase};
    use kubeforge_engine::{ProviderRegistry, Step, StepContext, StepHandler, StepRegistry};
    use parking_lot::Mutex;

    use crate::client::MockKubeClient;
    use crate::controller::ERROR_REQUEUE;
    use crate::testing::{registry, sample_cluster, FakeConnector};

    /// Records invocations, failing steps listed in `failing`
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        failing: Arc<Mutex<BTreeSet<String>>>,
    }

    #[async_trait]
    impl StepHandler<ForgeCluster> for Recorder {
        async fn run(&self, ctx: &StepContext, _cluster: &mut ForgeCluster) -> Result<()> {
            self.calls.lock().push(ctx.step().to_string());
            if self.failing.lock().contains(ctx.step()) {
                return Err(Error::internal(format!("{} failed", ctx.step())));
            }
            Ok(())
        }
    }

    fn providers(recorder: &Recorder) -> ProviderRegistry<ForgeCluster> {
        let step = |name: &str| Step::new(name, recorder.clone());
        ProviderRegistry::new()
            .with(
                StepRegistry::builder("kubeadm")
                    .create(step("bootstrap"))
                    .create(step("install-cni"))
                    .update(step("upgrade"))
                    .update(step("rotate-certs"))
                    .delete(step("teardown"))
                    .build()
                    .unwrap(),
            )
            .unwrap()
    }

    /// Captures patched statuses
    #[derive(Clone, Default)]
    struct StatusCapture {
        statuses: Arc<Mutex<Vec<LifecycleStatus>>>,
    }

    impl StatusCapture {
        fn last(&self) -> Option<LifecycleStatus> {
            self.statuses.lock().last().cloned()
        }
    }

    fn mock_kube(capture: &StatusCapture) -> MockKubeClient {
        let mut mock = MockKubeClient::new();
        let statuses = capture.statuses.clone();
        mock.expect_patch_cluster_status().returning(move |_, status| {
            statuses.lock().push(status.clone());
            Ok(())
        });
        mock.expect_add_cluster_finalizer().returning(|_, _| Ok(()));
        mock.expect_get_config_map_data().returning(|_, _| Ok(None));
        mock
    }

    fn context(kube: MockKubeClient, recorder: &Recorder) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(kube),
            providers(recorder),
            ProviderRegistry::new(),
            registry(FakeConnector::default()),
            BTreeSet::new(),
        ))
    }

    fn with_finalizer(mut cluster: ForgeCluster) -> ForgeCluster {
        cluster.metadata.finalizers = Some(vec![CLEANUP_FINALIZER.to_string()]);
        cluster
    }

    fn running(mut cluster: ForgeCluster) -> ForgeCluster {
        cluster.status = Some(LifecycleStatus::with_phase(Phase::Running));
        cluster
    }

    // ==========================================================================
    // Create Stories
    // ==========================================================================

    /// Story: a new cluster gets its finalizer and its first create step
    #[tokio::test]
    async fn story_new_cluster_runs_first_create_step() {
        let recorder = Recorder::default();
        let capture = StatusCapture::default();
        let ctx = context(mock_kube(&capture), &recorder);

        let action = reconcile(Arc::new(sample_cluster("prod", "kubeadm")), ctx)
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::ZERO));
        assert_eq!(*recorder.calls.lock(), vec!["bootstrap"]);
        let status = capture.last().expect("status should be patched");
        assert_eq!(status.phase, Phase::Pending);
        assert_eq!(status.conditions[0].type_, "bootstrap");
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    /// Story: the last create step settles the cluster into resync
    #[tokio::test]
    async fn story_last_create_step_marks_running() {
        let recorder = Recorder::default();
        let capture = StatusCapture::default();
        let ctx = context(mock_kube(&capture), &recorder);

        let first = with_finalizer(sample_cluster("prod", "kubeadm"));
        reconcile(Arc::new(first.clone()), Arc::clone(&ctx))
            .await
            .unwrap();

        let mut second = first;
        second.status = capture.last();
        let action = reconcile(Arc::new(second), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        assert_eq!(capture.last().unwrap().phase, Phase::Running);
        assert_eq!(*recorder.calls.lock(), vec!["bootstrap", "install-cni"]);
    }

    /// Story: a failing create step is recorded and retried shortly
    #[tokio::test]
    async fn story_failed_create_step_requeues() {
        let recorder = Recorder::default();
        recorder.failing.lock().insert("bootstrap".to_string());
        let capture = StatusCapture::default();
        let ctx = context(mock_kube(&capture), &recorder);

        let action = reconcile(Arc::new(sample_cluster("prod", "kubeadm")), ctx)
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(FAILED_STEP_REQUEUE));
        let status = capture.last().unwrap();
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
        assert_eq!(status.reason.as_deref(), Some("Failed"));
    }

    // ==========================================================================
    // Update Stories
    // ==========================================================================

    /// Story: a running cluster without the annotation does nothing
    #[tokio::test]
    async fn story_running_cluster_without_annotation_resyncs() {
        let recorder = Recorder::default();
        let mut kube = MockKubeClient::new();
        kube.expect_get_config_map_data().never();
        kube.expect_patch_cluster_status().never();
        let ctx = context(kube, &recorder);

        let cluster = running(with_finalizer(sample_cluster("prod", "kubeadm")));
        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        assert!(recorder.calls.lock().is_empty());
    }

    /// Story: the annotation runs the named steps and is cleared on success
    #[tokio::test]
    async fn story_annotation_runs_selected_updates() {
        let recorder = Recorder::default();
        let capture = StatusCapture::default();
        let mut kube = mock_kube(&capture);
        kube.expect_remove_cluster_annotation()
            .times(1)
            .returning(|name, annotation| {
                assert_eq!(name, "prod");
                assert_eq!(annotation, UPDATE_STEPS_ANNOTATION);
                Ok(())
            });
        let ctx = context(kube, &recorder);

        let mut cluster = running(with_finalizer(sample_cluster("prod", "kubeadm")));
        cluster.annotations_mut().insert(
            UPDATE_STEPS_ANNOTATION.to_string(),
            "rotate-certs".to_string(),
        );
        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        assert_eq!(*recorder.calls.lock(), vec!["rotate-certs"]);
        let status = capture.last().unwrap();
        assert_eq!(status.conditions[0].type_, "rotate-certs");
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    /// Story: a failed selected update keeps the annotation for a retry
    #[tokio::test]
    async fn story_failed_selected_update_keeps_annotation() {
        let recorder = Recorder::default();
        recorder.failing.lock().insert("upgrade".to_string());
        let capture = StatusCapture::default();
        let mut kube = mock_kube(&capture);
        kube.expect_remove_cluster_annotation().never();
        let ctx = context(kube, &recorder);

        let mut cluster = running(with_finalizer(sample_cluster("prod", "kubeadm")));
        cluster.annotations_mut().insert(
            UPDATE_STEPS_ANNOTATION.to_string(),
            "upgrade,rotate-certs".to_string(),
        );
        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(FAILED_STEP_REQUEUE));
        assert_eq!(*recorder.calls.lock(), vec!["upgrade"]);
    }

    // ==========================================================================
    // Delete Stories
    // ==========================================================================

    /// Story: deletion runs delete steps then releases the finalizer
    #[tokio::test]
    async fn story_deletion_runs_delete_steps() {
        let recorder = Recorder::default();
        let mut kube = MockKubeClient::new();
        kube.expect_remove_cluster_finalizer()
            .times(1)
            .returning(|_, finalizer| {
                assert_eq!(finalizer, CLEANUP_FINALIZER);
                Ok(())
            });
        let ctx = context(kube, &recorder);

        let mut cluster = running(with_finalizer(sample_cluster("prod", "kubeadm")));
        cluster.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*recorder.calls.lock(), vec!["teardown"]);
    }

    /// Story: a failing delete step keeps the finalizer
    #[tokio::test]
    async fn story_failed_delete_keeps_finalizer() {
        let recorder = Recorder::default();
        recorder.failing.lock().insert("teardown".to_string());
        let mut kube = MockKubeClient::new();
        kube.expect_remove_cluster_finalizer().never();
        let ctx = context(kube, &recorder);

        let mut cluster = with_finalizer(sample_cluster("prod", "kubeadm"));
        cluster.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        let err = reconcile(Arc::new(cluster), ctx).await.unwrap_err();

        assert_eq!(err.step_name(), Some("teardown"));
        assert_eq!(error_action(&err), Action::requeue(ERROR_REQUEUE));
    }

    /// Story: a cluster whose spec became invalid can still be deleted
    #[tokio::test]
    async fn story_deletion_ignores_invalid_spec() {
        let recorder = Recorder::default();
        let mut kube = MockKubeClient::new();
        kube.expect_remove_cluster_finalizer()
            .times(1)
            .returning(|_, _| Ok(()));
        let ctx = context(kube, &recorder);

        let mut cluster = running(with_finalizer(sample_cluster("prod", "kubeadm")));
        cluster.spec.kubernetes_version = String::new();
        cluster.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*recorder.calls.lock(), vec!["teardown"]);
    }

    /// Story: a cluster whose provider is gone releases its finalizer
    #[tokio::test]
    async fn story_deletion_with_unknown_provider_releases_finalizer() {
        let recorder = Recorder::default();
        let mut kube = MockKubeClient::new();
        kube.expect_remove_cluster_finalizer()
            .times(1)
            .returning(|name, _| {
                assert_eq!(name, "prod");
                Ok(())
            });
        let ctx = context(kube, &recorder);

        let mut cluster = with_finalizer(sample_cluster("prod", "talos"));
        cluster.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(recorder.calls.lock().is_empty());
    }

    // ==========================================================================
    // Validation Stories
    // ==========================================================================

    /// Story: an unknown provider waits for a spec change
    #[tokio::test]
    async fn story_unknown_provider_is_not_retried() {
        let recorder = Recorder::default();
        let ctx = context(MockKubeClient::new(), &recorder);

        let cluster = Arc::new(sample_cluster("prod", "talos"));
        let err = reconcile(Arc::clone(&cluster), Arc::clone(&ctx))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(error_policy(cluster, &err, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn story_invalid_spec_names_the_cluster() {
        let recorder = Recorder::default();
        let ctx = context(MockKubeClient::new(), &recorder);

        let mut cluster = sample_cluster("prod", "kubeadm");
        cluster.spec.kubernetes_version = String::new();
        let err = reconcile(Arc::new(cluster), ctx).await.unwrap_err();

        assert_eq!(err.object(), Some("prod"));
    }
}
