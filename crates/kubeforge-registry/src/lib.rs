//! Registry of managed-cluster connections
//!
//! Every cluster Kubeforge manages gets one [`ClusterConnection`]: its
//! credential, a native client, a cache-backed read client, a health status,
//! and the cancellation handle of its cache watch. The [`ClusterRegistry`]
//! stores connections sorted by name, hands them to reconcilers, and runs a
//! periodic health sweep that flips connections between Ready and Offline.

#![deny(missing_docs)]

pub mod api;
pub mod config;
pub mod connection;
pub mod connector;
pub mod credential;
pub mod registry;

pub use api::{CachedClient, ClusterApi, KubeClusterApi};
pub use config::RegistryConfig;
pub use connection::{ClusterConnection, ConnectionStatus};
pub use connector::{ClusterConnector, KubeConnector};
pub use credential::Credential;
pub use registry::{ClusterRegistry, SweepSummary, ALL_CLUSTERS};

pub use kubeforge_common::{Error, Result};
