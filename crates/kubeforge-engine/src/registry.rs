//! Step registries
//!
//! A [`StepRegistry`] holds one provider's create, update, and delete step
//! lists. Names are validated once, when the registry is built: every name
//! must be non-empty and unique within its list, since conditions are keyed
//! by step name alone.
//!
//! A [`ProviderRegistry`] maps provider names to their step registries and is
//! populated explicitly at startup.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use kubeforge_common::{Error, Result};

use crate::step::{LifecycleAction, Step};

/// An ordered, validated list of steps for one lifecycle action
pub struct StepList<O> {
    steps: Vec<Step<O>>,
}

impl<O: Send> StepList<O> {
    fn validated(provider: &str, action: LifecycleAction, steps: Vec<Step<O>>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            if step.name().trim().is_empty() {
                return Err(Error::invalid_steps(
                    provider,
                    format!("{action} step at position {index} has an empty name"),
                ));
            }
            if !seen.insert(step.name()) {
                return Err(Error::invalid_steps(
                    provider,
                    format!("duplicate {action} step name '{}'", step.name()),
                ));
            }
        }
        Ok(Self { steps })
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no steps are registered
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// First step in execution order
    pub fn first(&self) -> Option<&Step<O>> {
        self.steps.first()
    }

    /// Look up a step by name
    pub fn get(&self, name: &str) -> Option<&Step<O>> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Position of a step in execution order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }

    /// Steps after the named one, in execution order
    ///
    /// Empty when the name is the last step or is not registered.
    pub fn after(&self, name: &str) -> &[Step<O>] {
        match self.position(name) {
            Some(index) => &self.steps[index + 1..],
            None => &[],
        }
    }

    /// Iterate steps in execution order
    pub fn iter(&self) -> impl Iterator<Item = &Step<O>> {
        self.steps.iter()
    }

    /// Step names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

/// Create, update, and delete steps registered by one provider
pub struct StepRegistry<O> {
    provider: String,
    create: StepList<O>,
    update: StepList<O>,
    delete: StepList<O>,
}

impl<O: Send> StepRegistry<O> {
    /// Start building a registry for a provider
    pub fn builder(provider: impl Into<String>) -> StepRegistryBuilder<O> {
        StepRegistryBuilder {
            provider: provider.into(),
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }

    /// Provider name
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Create steps, executed one per reconcile
    pub fn create(&self) -> &StepList<O> {
        &self.create
    }

    /// Update steps
    pub fn update(&self) -> &StepList<O> {
        &self.update
    }

    /// Delete steps, executed in a single pass
    pub fn delete(&self) -> &StepList<O> {
        &self.delete
    }
}

/// Builder for [`StepRegistry`]
pub struct StepRegistryBuilder<O> {
    provider: String,
    create: Vec<Step<O>>,
    update: Vec<Step<O>>,
    delete: Vec<Step<O>>,
}

impl<O: Send> StepRegistryBuilder<O> {
    /// Append a create step
    pub fn create(mut self, step: Step<O>) -> Self {
        self.create.push(step);
        self
    }

    /// Append an update step
    pub fn update(mut self, step: Step<O>) -> Self {
        self.update.push(step);
        self
    }

    /// Append a delete step
    pub fn delete(mut self, step: Step<O>) -> Self {
        self.delete.push(step);
        self
    }

    /// Validate step names and build the registry
    pub fn build(self) -> Result<StepRegistry<O>> {
        let provider = self.provider;
        if provider.trim().is_empty() {
            return Err(Error::invalid_steps(
                kubeforge_common::error::UNKNOWN_CONTEXT,
                "provider name cannot be empty",
            ));
        }
        let create = StepList::validated(&provider, LifecycleAction::Create, self.create)?;
        let update = StepList::validated(&provider, LifecycleAction::Update, self.update)?;
        let delete = StepList::validated(&provider, LifecycleAction::Delete, self.delete)?;
        Ok(StepRegistry {
            provider,
            create,
            update,
            delete,
        })
    }
}

/// Step registries keyed by provider name
pub struct ProviderRegistry<O> {
    providers: BTreeMap<String, Arc<StepRegistry<O>>>,
}

impl<O> Default for ProviderRegistry<O> {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }
}

impl<O: Send> ProviderRegistry<O> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's steps
    ///
    /// Fails if the provider is already registered.
    pub fn register(&mut self, steps: StepRegistry<O>) -> Result<()> {
        let provider = steps.provider().to_string();
        if self.providers.contains_key(&provider) {
            return Err(Error::invalid_steps(
                &provider,
                "provider is already registered",
            ));
        }
        self.providers.insert(provider, Arc::new(steps));
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, steps: StepRegistry<O>) -> Result<Self> {
        self.register(steps)?;
        Ok(self)
    }

    /// Resolve the step registry for a provider
    pub fn resolve(&self, provider: &str) -> Result<Arc<StepRegistry<O>>> {
        self.providers.get(provider).cloned().ok_or_else(|| {
            Error::validation_for_field(
                provider,
                "spec.provider",
                format!(
                    "unknown provider '{provider}', registered providers: [{}]",
                    self.providers().join(", ")
                ),
            )
        })
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
