//! Supporting types shared by the ForgeCluster and ForgeMachine CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coarse lifecycle phase of a managed object
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    /// Create steps are still being executed
    #[default]
    Pending,
    /// Every create step has succeeded (terminal for create)
    Running,
}

impl Phase {
    /// Returns true once creation has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Step completed (or was skipped)
    True,
    /// Step failed on its last attempt
    False,
    /// Step is current but has not run yet
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Returns true if a step with this status still has to run
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::False | Self::Unknown)
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Machine-readable reason attached to a step condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionReason {
    /// Step is queued as the next one to run
    Waiting,
    /// Step was bypassed by the skip-list
    Skip,
    /// Step handler returned an error
    Failed,
    /// Step handler completed
    Succeeded,
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::Skip => write!(f, "Skip"),
            Self::Failed => write!(f, "Failed"),
            Self::Succeeded => write!(f, "Succeeded"),
        }
    }
}

/// Kubernetes-style condition recording the outcome of one step
///
/// `type_` is the step name, which is the join key between a condition and
/// the handler that produces it.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Step name
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the step (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: ConditionReason,

    /// Handler error message, only set on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the step was evaluated
    pub last_probe_time: DateTime<Utc>,

    /// Last time the status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: ConditionReason,
        message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_: type_.into(),
            status,
            reason,
            message,
            last_probe_time: now,
            last_transition_time: now,
        }
    }

    /// Step queued as current but not executed yet
    pub fn waiting(step: impl Into<String>) -> Self {
        Self::new(step, ConditionStatus::Unknown, ConditionReason::Waiting, None)
    }

    /// Step handler completed
    pub fn succeeded(step: impl Into<String>) -> Self {
        Self::new(step, ConditionStatus::True, ConditionReason::Succeeded, None)
    }

    /// Step bypassed by the skip-list
    pub fn skipped(step: impl Into<String>) -> Self {
        Self::new(step, ConditionStatus::True, ConditionReason::Skip, None)
    }

    /// Step handler failed with the given message
    pub fn failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            step,
            ConditionStatus::False,
            ConditionReason::Failed,
            Some(message.into()),
        )
    }
}

/// Status shared by every managed object kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Step conditions, in the order their steps first became current
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Reason of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Message of the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LifecycleStatus {
    /// Create a status with the given phase
    pub fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }
}

/// Reference to a key inside a Secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name
    pub name: String,

    /// Secret namespace (defaults to the system namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key inside the Secret data
    #[serde(default = "default_secret_key")]
    pub key: String,
}

fn default_secret_key() -> String {
    "kubeconfig".to_string()
}
