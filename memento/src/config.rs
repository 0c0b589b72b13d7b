//! Memoizer configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use memento_backends::{BackendOptions, BackendRegistry};
use memento_core::constants::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_TTL, MEMORY_BACKEND};
use memento_core::error::{MemoError, Result};
use memento_core::traits::CacheBackend;

use crate::memoizer::Memoizer;

// ═══════════════════════════════════════════════════════════════════════════════
// MEMOIZER CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Options for a [`Memoizer`].
pub struct MemoizerConfig<V> {
    /// Lifetime of newly cached values. Must be non-zero.
    pub ttl: Duration,
    /// Storage for cached values. Required.
    pub backend: Option<Arc<dyn CacheBackend<V>>>,
    /// Whether hit/miss/latency counters are recorded.
    pub metrics_enabled: bool,
    /// Sweep cadence of backends resolved by name, through
    /// [`MemoizerBuilder::backend_named`] or [`CacheSettings::into_config`].
    pub cleanup_interval: Duration,
    /// Whether a computation whose owning caller was cancelled still
    /// populates the cache when it finishes.
    pub cache_on_cancel: bool,
}

impl<V> MemoizerConfig<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Options handed to a registry factory when the backend is resolved by name.
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            cleanup_interval: self.cleanup_interval,
        }
    }

    /// Checks the options, failing on a missing backend or a zero TTL.
    pub fn validate(&self) -> Result<()> {
        if self.backend.is_none() {
            return Err(MemoError::MissingBackend);
        }
        if self.ttl.is_zero() {
            return Err(MemoError::InvalidTtl(self.ttl));
        }
        Ok(())
    }
}

impl<V> Default for MemoizerConfig<V> {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            backend: None,
            metrics_enabled: false,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            cache_on_cancel: true,
        }
    }
}

impl<V> Clone for MemoizerConfig<V> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            backend: self.backend.clone(),
            metrics_enabled: self.metrics_enabled,
            cleanup_interval: self.cleanup_interval,
            cache_on_cancel: self.cache_on_cancel,
        }
    }
}

impl<V> fmt::Debug for MemoizerConfig<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizerConfig")
            .field("ttl", &self.ttl)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("metrics_enabled", &self.metrics_enabled)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("cache_on_cancel", &self.cache_on_cancel)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Fluent construction of a [`Memoizer`].
pub struct MemoizerBuilder<V> {
    config: MemoizerConfig<V>,
    /// Registry and name to resolve the backend from at build time
    named: Option<(BackendRegistry<V>, String)>,
}

impl<V> MemoizerBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: MemoizerConfig::default(),
            named: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CacheBackend<V>>) -> Self {
        self.config.backend = Some(backend);
        self.named = None;
        self
    }

    /// Creates the backend from `registry` at build time, passing it the
    /// configured [`cleanup_interval`](Self::cleanup_interval).
    ///
    /// Replaces any backend set with [`backend`](Self::backend).
    pub fn backend_named(mut self, registry: &BackendRegistry<V>, name: &str) -> Self {
        self.config.backend = None;
        self.named = Some((registry.clone(), name.to_string()));
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn cache_on_cancel(mut self, enabled: bool) -> Self {
        self.config.cache_on_cancel = enabled;
        self
    }

    /// Resolves a named backend and returns the options without validating them.
    ///
    /// # Errors
    ///
    /// [`MemoError::UnknownBackend`] if the name set by
    /// [`backend_named`](Self::backend_named) is not registered.
    pub fn into_config(self) -> Result<MemoizerConfig<V>> {
        let mut config = self.config;
        if let Some((registry, name)) = self.named {
            config.backend = Some(registry.create_with(&name, &config.backend_options())?);
        }
        Ok(config)
    }

    /// Validates the options and builds the memoizer.
    pub fn build(self) -> Result<Memoizer<V>> {
        Memoizer::new(self.into_config()?)
    }
}

impl<V> Default for MemoizerBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializable settings, loadable from the environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_ms: u64,
    pub metrics_enabled: bool,
    pub cleanup_interval_ms: u64,
    pub cache_on_cancel: bool,
    /// Registry name of the backend to create.
    pub backend: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL.as_millis() as u64,
            metrics_enabled: false,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL.as_millis() as u64,
            cache_on_cancel: true,
            backend: MEMORY_BACKEND.to_string(),
        }
    }
}

impl CacheSettings {
    /// Loads settings from the environment (and a `.env` file if present).
    ///
    /// Recognised variables: `MEMENTO_TTL_MS`, `MEMENTO_METRICS`,
    /// `MEMENTO_CLEANUP_INTERVAL_MS`, `MEMENTO_CACHE_ON_CANCEL`,
    /// `MEMENTO_BACKEND`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(raw) = lookup("MEMENTO_TTL_MS") {
            settings.ttl_ms = parse_millis("MEMENTO_TTL_MS", &raw)?;
        }
        if let Some(raw) = lookup("MEMENTO_METRICS") {
            settings.metrics_enabled = parse_flag(&raw);
        }
        if let Some(raw) = lookup("MEMENTO_CLEANUP_INTERVAL_MS") {
            settings.cleanup_interval_ms = parse_millis("MEMENTO_CLEANUP_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("MEMENTO_CACHE_ON_CANCEL") {
            settings.cache_on_cancel = parse_flag(&raw);
        }
        if let Some(raw) = lookup("MEMENTO_BACKEND") {
            settings.backend = raw.trim().to_string();
        }

        Ok(settings)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Resolves the backend by name and produces a memoizer config.
    pub fn into_config<V>(self, registry: &BackendRegistry<V>) -> Result<MemoizerConfig<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut config = MemoizerConfig {
            ttl: self.ttl(),
            backend: None,
            metrics_enabled: self.metrics_enabled,
            cleanup_interval: self.cleanup_interval(),
            cache_on_cancel: self.cache_on_cancel,
        };
        config.backend = Some(registry.create_with(&self.backend, &config.backend_options())?);
        Ok(config)
    }
}

fn parse_millis(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| MemoError::ConfigError(format!("{} must be a whole number of milliseconds, got {:?}", name, raw)))
}

fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw != "false" && raw != "0" && !raw.is_empty()
}
