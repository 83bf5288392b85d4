//! One registered cluster connection
//!
//! A connection owns the cache watch of its cluster. The watch is started at
//! most once at a time and stopped by cancelling its token; the status is an
//! atomic so the health sweep can flip it while reconcilers read it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubeforge_common::{Error, Result};

use crate::api::{CachedClient, ClusterApi};
use crate::credential::Credential;

/// Health status of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Last probe succeeded
    Ready = 0,
    /// Last probe failed; the connection is excluded from lookups
    Offline = 1,
    /// Under maintenance; the health sweep leaves it alone
    Maintaining = 2,
}

impl ConnectionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Ready,
            2 => Self::Maintaining,
            _ => Self::Offline,
        }
    }

    /// Returns true if reconcilers may use the connection
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Offline => write!(f, "Offline"),
            Self::Maintaining => write!(f, "Maintaining"),
        }
    }
}

/// A managed cluster's entry in the registry
pub struct ClusterConnection {
    name: String,
    credential: Credential,
    api: Arc<dyn ClusterApi>,
    status: AtomicU8,
    started: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ClusterConnection {
    /// Create a Ready connection whose cache is not started yet
    pub fn new(name: impl Into<String>, credential: Credential, api: Arc<dyn ClusterApi>) -> Self {
        Self {
            name: name.into(),
            credential,
            api,
            status: AtomicU8::new(ConnectionStatus::Ready as u8),
            started: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Credential the connection was built from
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Native cluster access
    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }

    /// Cache-backed read client
    pub fn cache(&self) -> Option<CachedClient> {
        self.api.cache()
    }

    /// Current health status
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Set the status, returning the previous one
    pub fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.swap(status as u8, Ordering::AcqRel))
    }

    /// Returns true while the cache watch is running
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Probe liveness, bounded by `timeout`
    pub async fn probe(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.api.probe()).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection(
                &self.name,
                format!("liveness probe timed out after {timeout:?}"),
            )),
        }
    }

    /// Start the cache watch and wait for its initial sync
    ///
    /// No-op if already started. The wait ends when the cache is synced,
    /// `ctx` is cancelled, [`stop`](Self::stop) is called, or `timeout`
    /// elapses; in all but the first case the watch is cancelled and the
    /// connection stays unstarted. The watch itself outlives `ctx` and runs
    /// until [`stop`](Self::stop).
    pub async fn start_cache(&self, ctx: &CancellationToken, timeout: Duration) -> Result<()> {
        let token = {
            let mut slot = self.cancel.lock();
            if self.started.load(Ordering::Acquire) {
                debug!(cluster = %self.name, "cache already started");
                return Ok(());
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            self.started.store(true, Ordering::Release);
            token
        };

        let (synced_tx, synced_rx) = oneshot::channel();
        let api = Arc::clone(&self.api);
        let watch_token = token.clone();
        let cluster = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = api.sync_cache(watch_token, synced_tx).await {
                warn!(cluster = %cluster, error = %e, "cache watch stopped with error");
            }
        });

        let result = tokio::select! {
            synced = synced_rx => synced.map_err(|_| {
                Error::connection(&self.name, "cache watch exited before initial sync")
            }),
            _ = token.cancelled() => Err(Error::connection(
                &self.name,
                "cache stopped while waiting for initial sync",
            )),
            _ = ctx.cancelled() => Err(Error::connection(
                &self.name,
                "cancelled while waiting for cache sync",
            )),
            _ = tokio::time::sleep(timeout) => Err(Error::connection(
                &self.name,
                format!("cache sync timed out after {timeout:?}"),
            )),
        };

        match result {
            Ok(()) => {
                info!(cluster = %self.name, "cache started");
                Ok(())
            }
            Err(e) => {
                {
                    let mut slot = self.cancel.lock();
                    // A cancelled token means stop() already released the slot
                    if !token.is_cancelled() {
                        *slot = None;
                        self.started.store(false, Ordering::Release);
                    }
                }
                token.cancel();
                Err(e)
            }
        }
    }

    /// Stop the cache watch
    ///
    /// Safe to call repeatedly; a stopped connection can be started again.
    /// A start still waiting for its initial sync is aborted.
    pub fn stop(&self) {
        let mut slot = self.cancel.lock();
        if let Some(token) = slot.take() {
            token.cancel();
            self.started.store(false, Ordering::Release);
            info!(cluster = %self.name, "cache stopped");
        }
    }

    /// Move the status from `current` to `next` unless it changed meanwhile
    ///
    /// Returns the status actually held when the exchange fails.
    pub fn transition_status(
        &self,
        current: ConnectionStatus,
        next: ConnectionStatus,
    ) -> std::result::Result<(), ConnectionStatus> {
        self.status
            .compare_exchange(current as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionStatus::from_u8)
    }
}

impl fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("started", &self.is_started())
            .finish()
    }
}
