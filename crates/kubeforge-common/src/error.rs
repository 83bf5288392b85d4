//! Error types for Kubeforge
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the managed object, step, or cluster it concerns so
//! that a log line is enough to locate the failing resource.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Kubeforge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a managed object or configuration
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Name of the object with invalid configuration
        object: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.provider")
        field: Option<String>,
    },

    /// Create was invoked on an object whose phase is already terminal
    #[error("{object} is already running, no create step left to execute")]
    AlreadyRunning {
        /// Name of the managed object
        object: String,
    },

    /// A lifecycle action was invoked with no registered steps
    #[error("no {action} steps registered for {object}")]
    NoSteps {
        /// Name of the managed object
        object: String,
        /// Lifecycle action (create, update, delete)
        action: String,
    },

    /// The persisted conditions do not resolve to any pending step
    #[error("no step to process for {object}")]
    NoStepToProcess {
        /// Name of the managed object
        object: String,
    },

    /// A condition or selector names a step that is not registered
    #[error("unknown step '{step}' requested for {object}")]
    UnknownStep {
        /// Name of the managed object
        object: String,
        /// The unresolvable step name
        step: String,
    },

    /// A step list was assembled with empty or duplicate names
    #[error("invalid step registry [{provider}]: {message}")]
    InvalidSteps {
        /// Provider whose step list is invalid
        provider: String,
        /// Description of what's invalid
        message: String,
    },

    /// A step handler failed
    #[error("step '{step}' failed for {object}: {message}")]
    Step {
        /// Name of the managed object
        object: String,
        /// Name of the failing step
        step: String,
        /// Handler error message
        message: String,
    },

    /// A cluster connection with the same name is already registered
    #[error("cluster {cluster} is already registered")]
    DuplicateCluster {
        /// Name of the cluster
        cluster: String,
    },

    /// No cluster connection with that name is registered
    #[error("cluster {cluster} not found")]
    ClusterNotFound {
        /// Name of the cluster
        cluster: String,
    },

    /// The cluster connection exists but failed its last health check
    #[error("cluster {cluster} is offline")]
    ClusterOffline {
        /// Name of the cluster
        cluster: String,
    },

    /// Building or syncing a cluster connection failed
    #[error("connection error for {cluster}: {message}")]
    Connection {
        /// Name of the cluster
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "engine", "registry")
        context: String,
    },
}

impl Error {
    /// Create a validation error without object context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            object: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named object
    pub fn validation_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named object and field path
    pub fn validation_for_field(
        object: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an "already running" error
    pub fn already_running(object: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            object: object.into(),
        }
    }

    /// Create a "no steps registered" error for a lifecycle action
    pub fn no_steps(object: impl Into<String>, action: impl Into<String>) -> Self {
        Self::NoSteps {
            object: object.into(),
            action: action.into(),
        }
    }

    /// Create a "no step to process" error
    pub fn no_step_to_process(object: impl Into<String>) -> Self {
        Self::NoStepToProcess {
            object: object.into(),
        }
    }

    /// Create an "unknown step" error
    pub fn unknown_step(object: impl Into<String>, step: impl Into<String>) -> Self {
        Self::UnknownStep {
            object: object.into(),
            step: step.into(),
        }
    }

    /// Create an invalid step registry error
    pub fn invalid_steps(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSteps {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a step failure error
    pub fn step(
        object: impl Into<String>,
        step: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Step {
            object: object.into(),
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a duplicate cluster registration error
    pub fn duplicate_cluster(cluster: impl Into<String>) -> Self {
        Self::DuplicateCluster {
            cluster: cluster.into(),
        }
    }

    /// Create a cluster not found error
    pub fn cluster_not_found(cluster: impl Into<String>) -> Self {
        Self::ClusterNotFound {
            cluster: cluster.into(),
        }
    }

    /// Create a cluster offline error
    pub fn cluster_offline(cluster: impl Into<String>) -> Self {
        Self::ClusterOffline {
            cluster: cluster.into(),
        }
    }

    /// Create a connection error
    pub fn connection(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Programming and configuration errors (terminal object, empty or
    /// inconsistent step lists, unknown steps, duplicate registration) need a
    /// fix before anything changes, so they are not retryable. Step, connection,
    /// and transient Kubernetes failures are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::AlreadyRunning { .. } => false,
            Error::NoSteps { .. } => false,
            Error::NoStepToProcess { .. } => false,
            Error::UnknownStep { .. } => false,
            Error::InvalidSteps { .. } => false,
            Error::Step { .. } => true,
            Error::DuplicateCluster { .. } => false,
            Error::ClusterNotFound { .. } => true,
            Error::ClusterOffline { .. } => true,
            Error::Connection { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the managed object name if this error concerns one
    pub fn object(&self) -> Option<&str> {
        match self {
            Error::Validation { object, .. }
            | Error::AlreadyRunning { object }
            | Error::NoSteps { object, .. }
            | Error::NoStepToProcess { object }
            | Error::UnknownStep { object, .. }
            | Error::Step { object, .. } => Some(object),
            _ => None,
        }
    }

    /// Get the cluster name if this error concerns a registered connection
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::DuplicateCluster { cluster }
            | Error::ClusterNotFound { cluster }
            | Error::ClusterOffline { cluster }
            | Error::Connection { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the step name if this error concerns a single step
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Error::UnknownStep { step, .. } | Error::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Categories in the Step Engine
    // ==========================================================================
    //
    // The engine distinguishes programming errors (fatal to the call) from step
    // failures (retried on a later reconcile). Controllers rely on
    // is_retryable() to pick a requeue strategy.

    /// Story: a finished cluster rejects another create pass
    #[test]
    fn story_terminal_object_rejects_create() {
        let err = Error::already_running("prod-cluster");
        assert!(err.to_string().contains("already running"));
        assert_eq!(err.object(), Some("prod-cluster"));
        assert!(!err.is_retryable());
    }

    /// Story: misconfigured step lists surface as configuration errors
    #[test]
    fn story_step_configuration_errors_are_fatal() {
        assert!(!Error::no_steps("c1", "create").is_retryable());
        assert!(!Error::no_step_to_process("c1").is_retryable());
        assert!(!Error::invalid_steps("kubeadm", "duplicate step name 'certs'").is_retryable());

        let err = Error::unknown_step("c1", "install-cni");
        assert!(err.to_string().contains("install-cni"));
        assert_eq!(err.step_name(), Some("install-cni"));
        assert!(!err.is_retryable());
    }

    /// Story: handler failures carry the step that broke
    #[test]
    fn story_step_failures_are_retryable() {
        let err = Error::step("worker-0", "join-node", "ssh: connection refused");
        assert!(err.to_string().contains("join-node"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.object(), Some("worker-0"));
        assert!(err.is_retryable());
    }

    // ==========================================================================
    // Story Tests: Cluster Registry Errors
    // ==========================================================================

    /// Story: registering the same cluster twice is a caller bug
    #[test]
    fn story_duplicate_registration_is_not_retryable() {
        let err = Error::duplicate_cluster("edge-1");
        assert_eq!(err.cluster(), Some("edge-1"));
        assert!(!err.is_retryable());
    }

    /// Story: offline and missing clusters may come back
    #[test]
    fn story_unavailable_clusters_are_retryable() {
        assert!(Error::cluster_offline("edge-1").is_retryable());
        assert!(Error::cluster_not_found("edge-2").is_retryable());
        assert!(Error::connection("edge-3", "cache sync timed out").is_retryable());
        assert_eq!(Error::cluster_offline("edge-1").object(), None);
    }

    #[test]
    fn test_validation_for_field() {
        let err = Error::validation_for_field("c1", "spec.provider", "must not be empty");
        match &err {
            Error::Validation { field, object, .. } => {
                assert_eq!(field.as_deref(), Some("spec.provider"));
                assert_eq!(object, "c1");
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_default_context() {
        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains("[unknown]"));
        match Error::validation("bad") {
            Error::Validation { object, .. } => assert_eq!(object, UNKNOWN_CONTEXT),
            _ => panic!("Expected Validation variant"),
        }
    }
}
