//! Per-key call deduplication.
//!
//! [`SingleFlight`] guarantees that at most one computation runs per key at
//! a time. The first caller for a key becomes the owner and launches the
//! computation; callers arriving while it runs wait for the same outcome.
//!
//! ```text
//!   no call in flight ──(first caller)──▶ call in flight ──(finished)──▶ no call in flight
//! ```
//!
//! The computation runs on its own tokio task, so it always completes and
//! publishes its result even if the owning caller is dropped or cancelled.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use memento_core::error::{MemoError, Result};

type Outcome<V> = Option<Result<V>>;
type CallMap<V> = Mutex<HashMap<String, Arc<PendingCall<V>>>>;

/// A call currently in flight for one key.
struct PendingCall<V> {
    /// Holds `None` until the computation publishes its outcome exactly once.
    outcome: watch::Receiver<Outcome<V>>,
    owner_cancelled: Arc<AtomicBool>,
}

/// Context handed to the computation launched by [`SingleFlight::run`].
#[derive(Clone, Debug)]
pub struct CallContext {
    key: String,
    owner_cancelled: Arc<AtomicBool>,
}

impl CallContext {
    /// Key the computation runs for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true once the caller that launched this computation gave up waiting.
    pub fn owner_cancelled(&self) -> bool {
        self.owner_cancelled.load(Ordering::Acquire)
    }
}

/// Deduplicates concurrent calls by key.
///
/// Cloning shares the live-call table.
pub struct SingleFlight<V> {
    calls: Arc<CallMap<V>>,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty coordinator.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `f` once for `key`, sharing its outcome with every overlapping caller.
    ///
    /// Returns the outcome and whether this caller owned the call. When
    /// `cancel` resolves before the outcome is available the caller returns
    /// [`MemoError::Cancelled`] at once; the computation and the other waiters
    /// are unaffected.
    pub async fn run<F, Fut, C>(&self, key: &str, cancel: C, f: F) -> (Result<V>, bool)
    where
        F: FnOnce(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
        C: Future<Output = ()>,
    {
        let (call, launch) = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(call) => (Arc::clone(call), None),
                None => {
                    let (publisher, outcome) = watch::channel(None);
                    let call = Arc::new(PendingCall {
                        outcome,
                        owner_cancelled: Arc::new(AtomicBool::new(false)),
                    });
                    calls.insert(key.to_string(), Arc::clone(&call));
                    (call, Some(publisher))
                }
            }
        };

        let owner = launch.is_some();
        if let Some(publisher) = launch {
            debug!(key, "Launching call");
            self.launch(key, &call, publisher, f);
        } else {
            debug!(key, "Joining in-flight call");
        }

        let result = Self::wait(&call, cancel).await;
        if owner && matches!(result, Err(MemoError::Cancelled)) {
            call.owner_cancelled.store(true, Ordering::Release);
        }
        (result, owner)
    }

    fn launch<F, Fut>(
        &self,
        key: &str,
        call: &Arc<PendingCall<V>>,
        publisher: watch::Sender<Outcome<V>>,
        f: F,
    ) where
        F: FnOnce(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let context = CallContext {
            key: key.to_string(),
            owner_cancelled: Arc::clone(&call.owner_cancelled),
        };
        let mut completion = Completion {
            calls: Arc::clone(&self.calls),
            key: key.to_string(),
            call: Arc::clone(call),
            publisher: Some(publisher),
        };

        tokio::spawn(async move {
            let result = f(context).await;
            completion.finish(result);
        });
    }

    async fn wait<C>(call: &PendingCall<V>, cancel: C) -> Result<V>
    where
        C: Future<Output = ()>,
    {
        let mut outcome = call.outcome.clone();

        tokio::select! {
            biased;
            published = outcome.wait_for(Option::is_some) => match published {
                Ok(published) => published
                    .clone()
                    .unwrap_or_else(|| Err(MemoError::ComputationAborted("empty outcome".into()))),
                Err(_) => Err(MemoError::ComputationAborted(
                    "computation task ended without a result".into(),
                )),
            },
            _ = cancel => Err(MemoError::Cancelled),
        }
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns true if a call for `key` is in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.calls.lock().contains_key(key)
    }
}

/// Publishes the outcome and deregisters the call.
///
/// Dropping it unfinished (the computation panicked) still deregisters the
/// call; the dropped publisher wakes every waiter with an abort.
struct Completion<V> {
    calls: Arc<CallMap<V>>,
    key: String,
    call: Arc<PendingCall<V>>,
    publisher: Option<watch::Sender<Outcome<V>>>,
}

impl<V> Completion<V> {
    fn finish(&mut self, result: Result<V>) {
        let mut calls = self.calls.lock();
        if let Some(publisher) = self.publisher.take() {
            publisher.send_replace(Some(result));
        }
        self.deregister(&mut calls);
    }

    fn deregister(&self, calls: &mut HashMap<String, Arc<PendingCall<V>>>) {
        if calls
            .get(&self.key)
            .map_or(false, |live| Arc::ptr_eq(live, &self.call))
        {
            calls.remove(&self.key);
        }
    }
}

impl<V> Drop for Completion<V> {
    fn drop(&mut self) {
        if self.publisher.is_some() {
            warn!(key = %self.key, "Computation ended without a result");
            let calls = Arc::clone(&self.calls);
            let mut calls = calls.lock();
            self.deregister(&mut calls);
            self.publisher = None;
        }
    }
}

impl<V> Clone for SingleFlight<V> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for SingleFlight<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}
