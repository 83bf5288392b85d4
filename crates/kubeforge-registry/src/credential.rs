//! Credentials for reaching a managed cluster

use std::fmt;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use kubeforge_common::{Error, Result};

/// Kubeconfig used to build a native client for a managed cluster
///
/// The kubeconfig carries secrets, so `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    kubeconfig: String,
}

impl Credential {
    /// Wrap a kubeconfig document
    pub fn from_kubeconfig(kubeconfig: impl Into<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
        }
    }

    /// Wrap a kubeconfig read from a Secret's data
    pub fn from_bytes(cluster: &str, bytes: &[u8]) -> Result<Self> {
        let kubeconfig = std::str::from_utf8(bytes).map_err(|e| {
            Error::connection(cluster, format!("kubeconfig is not valid UTF-8: {e}"))
        })?;
        if kubeconfig.trim().is_empty() {
            return Err(Error::connection(cluster, "kubeconfig is empty"));
        }
        Ok(Self::from_kubeconfig(kubeconfig))
    }

    /// Raw kubeconfig document
    pub fn kubeconfig(&self) -> &str {
        &self.kubeconfig
    }

    /// Build a native client with the given timeouts
    pub async fn client(
        &self,
        cluster: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Client> {
        let kubeconfig = Kubeconfig::from_yaml(&self.kubeconfig)
            .map_err(|e| Error::connection(cluster, format!("invalid kubeconfig: {e}")))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::connection(cluster, format!("failed to load kubeconfig: {e}")))?;
        config.connect_timeout = Some(connect_timeout);
        config.read_timeout = Some(read_timeout);
        Client::try_from(config)
            .map_err(|e| Error::connection(cluster, format!("failed to create client: {e}")))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kubeconfig", &"<redacted>")
            .finish()
    }
}
