//! Common types for Kubeforge: CRDs, conditions, errors, and configuration
//!
//! Everything the step engine, the cluster registry, and the controllers
//! agree on lives here so that none of those crates depend on each other
//! for their vocabulary.

#![deny(missing_docs)]

pub mod conditions;
pub mod config;
pub mod crd;
pub mod error;
pub mod object;
pub mod telemetry;

pub use error::Error;
pub use object::ManagedObject;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for Kubeforge system resources (skip-list ConfigMap, credentials)
pub const KUBEFORGE_SYSTEM_NAMESPACE: &str = "kubeforge-system";

/// Field manager used for every server-side patch issued by the operator
pub const FIELD_MANAGER: &str = "kubeforge-controller";

/// Annotation carrying the comma-separated list of update steps to run next
pub const UPDATE_STEPS_ANNOTATION: &str = "kubeforge.dev/update-steps";

/// Finalizer guarding delete-step execution
pub const CLEANUP_FINALIZER: &str = "kubeforge.dev/cleanup";

/// Name of the ConfigMap whose keys list create steps to bypass
pub const SKIP_STEPS_CONFIGMAP: &str = "kubeforge-skip-steps";
