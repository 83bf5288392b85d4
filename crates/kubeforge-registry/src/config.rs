//! Registry timing configuration

use std::time::Duration;

use kubeforge_common::config::{
    duration_secs, EnvConfig, CACHE_SYNC_TIMEOUT_ENV, HEALTH_CHECK_INTERVAL_ENV,
    PROBE_TIMEOUT_ENV,
};

/// Default interval between health sweeps
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Default per-connection liveness probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on the initial cache sync of a new connection
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect timeout for clients built from kubeconfigs
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for clients built from kubeconfigs
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing knobs for the cluster registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Interval between health sweeps
    pub health_check_interval: Duration,
    /// Timeout for a single connection's liveness probe
    pub probe_timeout: Duration,
    /// Bound on waiting for a new connection's initial cache sync
    pub cache_sync_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
        }
    }
}

impl RegistryConfig {
    /// Read overrides from the environment, keeping defaults for unset or
    /// unparsable values
    pub fn from_env(env: &dyn EnvConfig) -> Self {
        Self {
            health_check_interval: duration_secs(
                env,
                HEALTH_CHECK_INTERVAL_ENV,
                DEFAULT_HEALTH_CHECK_INTERVAL,
            ),
            probe_timeout: duration_secs(env, PROBE_TIMEOUT_ENV, DEFAULT_PROBE_TIMEOUT),
            cache_sync_timeout: duration_secs(
                env,
                CACHE_SYNC_TIMEOUT_ENV,
                DEFAULT_CACHE_SYNC_TIMEOUT,
            ),
        }
    }
}
