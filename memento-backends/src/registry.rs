//! Named backend factories.
//!
//! A [`BackendRegistry`] is an ordinary value owned by whoever composes the
//! application; nothing registers itself implicitly. Cloning a registry
//! shares the underlying table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use memento_core::constants::{DEFAULT_SWEEP_INTERVAL, MEMORY_BACKEND};
use memento_core::error::{MemoError, Result};
use memento_core::traits::CacheBackend;

use crate::MemoryBackend;

/// Factory producing a fresh backend instance.
pub type BackendFactory<V> = Arc<dyn Fn(&BackendOptions) -> Arc<dyn CacheBackend<V>> + Send + Sync>;

/// Construction options handed to every backend factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendOptions {
    /// Background sweep cadence; zero disables the sweep.
    pub cleanup_interval: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            cleanup_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Maps backend names to factories.
pub struct BackendRegistry<V> {
    factories: Arc<RwLock<HashMap<String, BackendFactory<V>>>>,
}

impl<V> BackendRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a registry with the in-memory backend registered as `"memory"`.
    ///
    /// Memory backends sweep at the `cleanup_interval` of the options they
    /// are created with.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let memory: BackendFactory<V> = Arc::new(|options: &BackendOptions| {
            Arc::new(MemoryBackend::<V>::with_cleanup_interval(options.cleanup_interval))
                as Arc<dyn CacheBackend<V>>
        });
        registry
            .factories
            .write()
            .insert(MEMORY_BACKEND.to_string(), memory);
        registry
    }

    /// Registers a factory under `name`.
    ///
    /// Fails if the name is empty or already taken; an existing factory is
    /// never replaced.
    pub fn register<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&BackendOptions) -> Arc<dyn CacheBackend<V>> + Send + Sync + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(MemoError::InvalidBackendName(name.to_string()));
        }

        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(MemoError::BackendAlreadyRegistered(name.to_string()));
        }

        factories.insert(name.to_string(), Arc::new(factory));
        debug!(name, "Registered backend factory");
        Ok(())
    }

    /// Builds a new backend instance by name with default options.
    pub fn create(&self, name: &str) -> Result<Arc<dyn CacheBackend<V>>> {
        self.create_with(name, &BackendOptions::default())
    }

    /// Builds a new backend instance by name.
    pub fn create_with(&self, name: &str, options: &BackendOptions) -> Result<Arc<dyn CacheBackend<V>>> {
        let factory = self
            .factories
            .read()
            .get(name.trim())
            .cloned()
            .ok_or_else(|| MemoError::UnknownBackend(name.to_string()))?;

        // The factory runs outside the lock so it may itself consult the registry.
        Ok(factory(options))
    }

    /// Returns every registered name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if a factory is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name.trim())
    }

    /// Returns the number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl<V> Clone for BackendRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            factories: Arc::clone(&self.factories),
        }
    }
}

impl<V> Default for BackendRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for BackendRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("BackendRegistry").field("backends", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_factory(_options: &BackendOptions) -> Arc<dyn CacheBackend<String>> {
        Arc::new(MemoryBackend::<String>::without_sweep())
    }

    #[test]
    fn test_register_and_list() {
        let registry = BackendRegistry::new();
        registry.register("alpha", memory_factory).unwrap();
        registry.register("beta", memory_factory).unwrap();

        assert!(registry.contains("alpha"));
        assert!(!registry.contains("gamma"));
        assert_eq!(registry.names(), vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = BackendRegistry::new();
        registry.register("memory", memory_factory).unwrap();

        let err = registry.register("memory", memory_factory).unwrap_err();
        assert!(matches!(err, MemoError::BackendAlreadyRegistered(ref name) if name == "memory"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry: BackendRegistry<String> = BackendRegistry::new();
        let err = registry.register("  ", memory_factory).unwrap_err();
        assert!(matches!(err, MemoError::InvalidBackendName(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_backend_is_typed_error() {
        let registry: BackendRegistry<String> = BackendRegistry::new();
        let err = registry.create("redis").err().unwrap();
        assert!(matches!(err, MemoError::UnknownBackend(ref name) if name == "redis"));
    }

    #[tokio::test]
    async fn test_create_returns_fresh_instances() {
        let registry = BackendRegistry::with_defaults();
        let first = registry.create(MEMORY_BACKEND).unwrap();
        let second = registry.create(MEMORY_BACKEND).unwrap();

        first.set("key", "value".to_string(), None).await;
        assert_eq!(first.get("key").await.as_deref(), Some("value"));
        assert!(second.get("key").await.is_none());
        assert_eq!(first.name(), "memory");

        first.shutdown();
        second.shutdown();
    }

    #[tokio::test]
    async fn test_options_reach_memory_backend() {
        let registry = BackendRegistry::<String>::with_defaults();
        let options = BackendOptions {
            cleanup_interval: Duration::from_millis(250),
        };

        let tuned = registry.create_with(MEMORY_BACKEND, &options).unwrap();
        assert_eq!(tuned.sweep_interval(), Some(Duration::from_millis(250)));

        let default = registry.create(MEMORY_BACKEND).unwrap();
        assert_eq!(default.sweep_interval(), Some(DEFAULT_SWEEP_INTERVAL));

        let unswept = registry
            .create_with(MEMORY_BACKEND, &BackendOptions { cleanup_interval: Duration::ZERO })
            .unwrap();
        assert_eq!(unswept.sweep_interval(), None);

        tuned.shutdown();
        default.shutdown();
    }

    #[test]
    fn test_clones_share_table() {
        let registry: BackendRegistry<String> = BackendRegistry::new();
        let shared = registry.clone();
        shared.register("custom", memory_factory).unwrap();
        assert!(registry.contains("custom"));
    }

    #[test]
    fn test_factory_may_use_registry() {
        let registry: BackendRegistry<String> = BackendRegistry::new();
        registry.register("inner", memory_factory).unwrap();

        let lookup = registry.clone();
        registry
            .register("alias", move |options: &BackendOptions| {
                lookup.create_with("inner", options).unwrap()
            })
            .unwrap();

        assert!(registry.create("alias").is_ok());
    }
}
