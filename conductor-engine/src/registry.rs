//! Action registry
//!
//! Maps an action name to the provider that builds its handler. The registry
//! is assembled once at startup from a static list and never mutated
//! afterwards, so executors share it behind an `Arc` without locking.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, Result};
use crate::job::JobHandle;

/// Handler for one job
///
/// Returns the job's return code: 0 for success, anything else for failure.
/// An `Err` (or a panic) is treated as a handler exception by the executor.
#[async_trait]
pub trait Action: Send {
    async fn do_work(&mut self, job: &mut JobHandle) -> anyhow::Result<i32>;
}

/// Constructs the handler for an action name
pub trait ActionProvider: Send + Sync {
    /// Action name the provider is registered under
    fn name(&self) -> &'static str;

    fn build(&self, job: &JobHandle) -> anyhow::Result<Box<dyn Action>>;
}

/// Immutable mapping from action name to provider
pub struct ActionRegistry {
    providers: HashMap<&'static str, Box<dyn ActionProvider>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Looks up the provider for an action
    pub fn get(&self, action: &str) -> Result<&dyn ActionProvider> {
        self.providers
            .get(action)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| EngineError::ActionNotImplemented(action.to_string()))
    }

    pub fn contains(&self, action: &str) -> bool {
        self.providers.contains_key(action)
    }

    /// Registered action names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct ActionRegistryBuilder {
    providers: HashMap<&'static str, Box<dyn ActionProvider>>,
}

impl ActionRegistryBuilder {
    /// Registers a provider
    ///
    /// # Panics
    /// Panics if a provider with the same name is already registered
    pub fn register<P: ActionProvider + 'static>(mut self, provider: P) -> Self {
        let name = provider.name();
        if self.providers.contains_key(name) {
            panic!("Action '{}' is already registered", name);
        }
        self.providers.insert(name, Box::new(provider));
        self
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            providers: self.providers,
        }
    }
}

/// Provider building handlers through a plain constructor function
pub struct FnProvider<F> {
    name: &'static str,
    constructor: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&JobHandle) -> anyhow::Result<Box<dyn Action>> + Send + Sync,
{
    pub fn new(name: &'static str, constructor: F) -> Self {
        Self { name, constructor }
    }
}

impl<F> ActionProvider for FnProvider<F>
where
    F: Fn(&JobHandle) -> anyhow::Result<Box<dyn Action>> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn build(&self, job: &JobHandle) -> anyhow::Result<Box<dyn Action>> {
        (self.constructor)(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Action for Noop {
        async fn do_work(&mut self, _job: &mut JobHandle) -> anyhow::Result<i32> {
            Ok(0)
        }
    }

    fn noop(name: &'static str) -> impl ActionProvider {
        FnProvider::new(name, |_job: &JobHandle| Ok(Box::new(Noop) as Box<dyn Action>))
    }

    #[test]
    fn test_lookup() {
        let registry = ActionRegistry::builder()
            .register(noop("reboot_edge"))
            .register(noop("bulk_delete"))
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("reboot_edge").is_ok());
        assert_eq!(registry.names(), vec!["bulk_delete", "reboot_edge"]);
    }

    #[test]
    fn test_unknown_action_is_an_error() {
        let registry = ActionRegistry::builder().build();
        let err = registry.get("deploy_app").err().unwrap();
        assert!(matches!(err, EngineError::ActionNotImplemented(name) if name == "deploy_app"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration() {
        let _ = ActionRegistry::builder()
            .register(noop("reboot_edge"))
            .register(noop("reboot_edge"));
    }
}
