//! Environment configuration for the operator
//!
//! Provides trait-based access to environment configuration,
//! enabling dependency injection and mocking for tests.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::KUBEFORGE_SYSTEM_NAMESPACE;

/// Environment variable for the system namespace
pub const NAMESPACE_ENV: &str = "KUBEFORGE_NAMESPACE";
/// Environment variable for the static skip-list (comma-separated step names)
pub const SKIP_STEPS_ENV: &str = "KUBEFORGE_SKIP_STEPS";
/// Environment variable for the health sweep interval in seconds
pub const HEALTH_CHECK_INTERVAL_ENV: &str = "KUBEFORGE_HEALTH_CHECK_INTERVAL_SECS";
/// Environment variable for the liveness probe timeout in seconds
pub const PROBE_TIMEOUT_ENV: &str = "KUBEFORGE_PROBE_TIMEOUT_SECS";
/// Environment variable for the initial cache sync timeout in seconds
pub const CACHE_SYNC_TIMEOUT_ENV: &str = "KUBEFORGE_CACHE_SYNC_TIMEOUT_SECS";
/// Environment variable switching logs to JSON
pub const LOG_JSON_ENV: &str = "KUBEFORGE_LOG_JSON";

/// Trait for reading operator configuration from the environment
///
/// This abstracts reading from environment variables, enabling
/// proper unit testing without manipulating global state.
#[cfg_attr(test, mockall::automock)]
pub trait EnvConfig: Send + Sync {
    /// Read a single variable
    fn var(&self, key: &str) -> Option<String>;
}

/// Default implementation that reads from process environment variables
#[derive(Clone, Debug, Default)]
pub struct OsEnvConfig;

impl EnvConfig for OsEnvConfig {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// System namespace, falling back to [`KUBEFORGE_SYSTEM_NAMESPACE`]
pub fn namespace(env: &dyn EnvConfig) -> String {
    env.var(NAMESPACE_ENV)
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| KUBEFORGE_SYSTEM_NAMESPACE.to_string())
}

/// Static skip-list from [`SKIP_STEPS_ENV`]
pub fn skip_steps(env: &dyn EnvConfig) -> BTreeSet<String> {
    env.var(SKIP_STEPS_ENV)
        .map(|raw| parse_step_list(&raw).into_iter().collect())
        .unwrap_or_default()
}

/// Duration in whole seconds, or `default` when unset or unparsable
pub fn duration_secs(env: &dyn EnvConfig, key: &str, default: Duration) -> Duration {
    match env.var(key) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                tracing::warn!(key, value = %raw, "ignoring invalid duration, using default");
                default
            }
        },
        None => default,
    }
}

/// Boolean flag; accepts `true`/`1`/`yes`
pub fn flag(env: &dyn EnvConfig, key: &str) -> bool {
    env.var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Split a comma-separated step list, dropping blanks and keeping order
pub fn parse_step_list(raw: &str) -> Vec<String> {
    let mut steps: Vec<String> = Vec::new();
    for step in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !steps.iter().any(|s| s == step) {
            steps.push(step.to_string());
        }
    }
    steps
}
