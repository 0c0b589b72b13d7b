//! Argument-keyed memoization of async functions.

use std::fmt;
use std::future::{pending, Future};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;

use memento_core::constants::KEY_NAMESPACE_SEPARATOR;
use memento_core::error::{BoxError, Result};
use memento_hash::hash_args;

use crate::memoizer::Memoizer;

/// Derives a cache key from a call's arguments.
pub type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// An async function whose results are cached by argument.
///
/// Created by [`Memoizer::memoize_fn`]. By default the key is the SHA3 hash
/// of the arguments' canonical JSON encoding; functions sharing one memoizer
/// should be told apart with [`with_namespace`](Self::with_namespace).
pub struct MemoizedFn<A, V, F> {
    memoizer: Memoizer<V>,
    func: Arc<F>,
    namespace: Option<String>,
    key_fn: Option<KeyFn<A>>,
    _args: PhantomData<fn(A)>,
}

impl<A, V, F, Fut, E> MemoizedFn<A, V, F>
where
    A: Serialize + fmt::Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    E: Into<BoxError>,
{
    pub(crate) fn new(memoizer: Memoizer<V>, func: F) -> Self {
        Self {
            memoizer,
            func: Arc::new(func),
            namespace: None,
            key_fn: None,
            _args: PhantomData,
        }
    }

    /// Prefixes every derived key with `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Replaces argument hashing with a custom key function.
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Cache key used for `args`.
    pub fn key(&self, args: &A) -> String {
        let base = match &self.key_fn {
            Some(key_fn) => key_fn(args),
            None => hash_args(args),
        };
        match &self.namespace {
            Some(namespace) => format!("{}{}{}", namespace, KEY_NAMESPACE_SEPARATOR, base),
            None => base,
        }
    }

    /// Returns the cached result for `args`, calling the function on a miss.
    pub async fn call(&self, args: A) -> Result<V> {
        self.call_with_cancel(args, pending()).await
    }

    /// Like [`call`](Self::call), returning early once `cancel` resolves.
    pub async fn call_with_cancel<C>(&self, args: A, cancel: C) -> Result<V>
    where
        C: Future<Output = ()>,
    {
        let key = self.key(&args);
        let func = Arc::clone(&self.func);
        self.memoizer
            .get_with_cancel(&key, cancel, move || func(args))
            .await
    }

    pub fn memoizer(&self) -> &Memoizer<V> {
        &self.memoizer
    }
}

impl<A, V, F> Clone for MemoizedFn<A, V, F> {
    fn clone(&self) -> Self {
        Self {
            memoizer: self.memoizer.clone(),
            func: Arc::clone(&self.func),
            namespace: self.namespace.clone(),
            key_fn: self.key_fn.clone(),
            _args: PhantomData,
        }
    }
}

impl<A, V, F> fmt::Debug for MemoizedFn<A, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedFn")
            .field("namespace", &self.namespace)
            .field("custom_key", &self.key_fn.is_some())
            .finish()
    }
}
