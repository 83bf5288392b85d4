//! ConfigMap-backed skip-list
//!
//! The `kubeforge-skip-steps` ConfigMap in the system namespace lists create
//! steps to bypass, one key per step name. A key whose value is `false`
//! does not skip. The static list from the environment is always merged in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use kubeforge_common::{Result, SKIP_STEPS_CONFIGMAP};
use kubeforge_engine::SkipListSource;

use crate::client::KubeClient;

/// Skip-list read from the skip-steps ConfigMap on every call
pub struct ConfigMapSkipList {
    kube: Arc<dyn KubeClient>,
    namespace: String,
    static_steps: BTreeSet<String>,
}

impl ConfigMapSkipList {
    /// Create a skip-list reading the ConfigMap in `namespace`
    pub fn new(
        kube: Arc<dyn KubeClient>,
        namespace: impl Into<String>,
        static_steps: BTreeSet<String>,
    ) -> Self {
        Self {
            kube,
            namespace: namespace.into(),
            static_steps,
        }
    }
}

/// Step names enabled in a skip-steps ConfigMap's data
pub fn enabled_steps(data: &BTreeMap<String, String>) -> BTreeSet<String> {
    data.iter()
        .filter(|(key, value)| !key.trim().is_empty() && !value.trim().eq_ignore_ascii_case("false"))
        .map(|(key, _)| key.trim().to_string())
        .collect()
}

#[async_trait]
impl SkipListSource for ConfigMapSkipList {
    async fn skip_list(&self) -> Result<BTreeSet<String>> {
        let mut steps = self.static_steps.clone();
        match self
            .kube
            .get_config_map_data(SKIP_STEPS_CONFIGMAP, &self.namespace)
            .await?
        {
            Some(data) => steps.extend(enabled_steps(&data)),
            None => debug!(namespace = %self.namespace, "no skip-steps ConfigMap"),
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;

    #[test]
    fn test_false_values_do_not_skip() {
        let data = BTreeMap::from([
            ("install-cni".to_string(), "".to_string()),
            ("register".to_string(), "true".to_string()),
            ("bootstrap".to_string(), "False".to_string()),
        ]);
        let steps = enabled_steps(&data);
        assert!(steps.contains("install-cni"));
        assert!(steps.contains("register"));
        assert!(!steps.contains("bootstrap"));
    }

    #[tokio::test]
    async fn test_merges_static_and_config_map_steps() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_config_map_data().returning(|name, ns| {
            if name != SKIP_STEPS_CONFIGMAP || ns != "kubeforge-system" {
                return Ok(None);
            }
            Ok(Some(BTreeMap::from([(
                "register".to_string(),
                "yes".to_string(),
            )])))
        });
        let skip = ConfigMapSkipList::new(
            Arc::new(kube),
            "kubeforge-system",
            BTreeSet::from(["bootstrap".to_string()]),
        );

        let steps = skip.skip_list().await.unwrap();
        assert_eq!(
            steps.into_iter().collect::<Vec<_>>(),
            vec!["bootstrap", "register"]
        );
    }

    #[tokio::test]
    async fn test_missing_config_map_uses_static_list() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_config_map_data().returning(|_, _| Ok(None));
        let skip = ConfigMapSkipList::new(Arc::new(kube), "ns", BTreeSet::new());
        assert!(skip.skip_list().await.unwrap().is_empty());
    }
}
