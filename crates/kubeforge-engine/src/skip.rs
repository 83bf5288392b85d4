//! Skip-list sources
//!
//! The skip-list names create steps that must be recorded as done without
//! running their handlers. It is read at the start of every create call, so
//! edits take effect on the next reconcile.

use std::collections::BTreeSet;

use async_trait::async_trait;

use kubeforge_common::Result;

/// Supplies the current set of step names to skip during create
#[async_trait]
pub trait SkipListSource: Send + Sync {
    /// Read the current skip-list
    async fn skip_list(&self) -> Result<BTreeSet<String>>;
}

/// A fixed skip-list
#[derive(Clone, Debug, Default)]
pub struct StaticSkipList {
    steps: BTreeSet<String>,
}

impl StaticSkipList {
    /// Create a skip-list from step names
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// Skip nothing
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SkipListSource for StaticSkipList {
    async fn skip_list(&self) -> Result<BTreeSet<String>> {
        Ok(self.steps.clone())
    }
}
