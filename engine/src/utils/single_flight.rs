//! Keyed single-flight execution.
//!
//! When several callers request the same computation concurrently, only the
//! first one runs it; the others attach to the in-progress result. The entry
//! for a key is removed exactly once, when the computation finishes, so the
//! next request after completion runs from scratch.
//!
//! Computations run on their own Tokio task. A caller that stops waiting
//! (for example a disconnected client) never cancels a computation that other
//! callers are still awaiting.
//!
//! # Example
//!
//! ```no_run
//! use chatlog_engine::utils::single_flight::SingleFlight;
//!
//! # async fn example() -> chatlog_engine::Result<()> {
//! let flights: SingleFlight<&'static str, usize> = SingleFlight::new();
//!
//! let (a, b) = tokio::join!(
//!     flights.run("scan", || async { Ok(42) }),
//!     flights.run("scan", || async { Ok(42) }),
//! );
//! assert_eq!(a?, b?);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::trace;

use crate::error::{EngineError, Result};

/// Output stored in the shared cell. Errors are reference-counted so every
/// waiter receives the same failure.
type SharedOutput<T> = std::result::Result<T, Arc<EngineError>>;

type InFlight<T> = Shared<BoxFuture<'static, SharedOutput<T>>>;

/// Registry of in-progress computations keyed by `K`.
pub struct SingleFlight<K, T>
where
    T: Clone,
{
    inflight: Arc<Mutex<HashMap<K, InFlight<T>>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Clone + Eq + Hash + Send + fmt::Debug + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `make()` for `key`, or joins the computation already running for it.
    ///
    /// `make` is only invoked when no computation for `key` is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Coalesced`] wrapping the computation's error (the
    /// same error for every caller), or [`EngineError::Task`] if the computation
    /// panicked.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = inflight.get(&key) {
                trace!(key = ?key, "Joining in-flight computation");
                existing.clone()
            } else {
                trace!(key = ?key, "Starting computation");
                // The lock is held until the entry is inserted, so the task's
                // own removal can never precede the insertion.
                let flight = self.spawn(key.clone(), make());
                inflight.insert(key, flight.clone());
                flight
            }
        };

        flight.await.map_err(EngineError::Coalesced)
    }

    /// Number of computations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn spawn<Fut>(&self, key: K, computation: Fut) -> InFlight<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let deregister = Deregister {
            registry: Arc::clone(&self.inflight),
            key,
        };

        let handle = tokio::spawn(async move {
            // Dropped after the output is produced, or while unwinding.
            let _deregister = deregister;
            let output = computation.await.map_err(Arc::new);
            trace!(ok = output.is_ok(), "Computation finished");
            output
        });

        async move {
            match handle.await {
                Ok(output) => output,
                Err(join_error) => Err(Arc::new(EngineError::Task(join_error.to_string()))),
            }
        }
        .boxed()
        .shared()
    }
}

/// Removes a registry entry when the owning computation ends.
struct Deregister<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    registry: Arc<Mutex<HashMap<K, InFlight<T>>>>,
    key: K,
}

impl<K, T> Drop for Deregister<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Clone + Eq + Hash + Send + fmt::Debug + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for SingleFlight<K, T>
where
    K: Clone + Eq + Hash + Send + fmt::Debug + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
