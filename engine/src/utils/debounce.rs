//! Debounce utility for coalescing bursts of file system events.
//!
//! Buffered appenders typically produce several modify events per logical
//! write. The [`Debouncer`] keeps one scheduled task per key: every new event
//! for a key cancels the task scheduled for it and schedules a fresh one, so a
//! single value is emitted per key once the key has been quiet for the
//! configured interval.
//!
//! # Architecture
//!
//! Events enter through a channel and are processed by a background loop that
//! owns the scheduling table (`key -> scheduled task`):
//!
//! 1. A new event replaces the table entry for its key and aborts the
//!    previously scheduled task
//! 2. The scheduled task sleeps for the interval, then removes its own entry
//!    from the table (only if it is still the current generation)
//! 3. After removal the final value is sent to the output channel
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use chatlog_engine::utils::debounce::Debouncer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (output_tx, mut output_rx) = mpsc::channel(100);
//!     let debouncer = Debouncer::new(Duration::from_millis(100), output_tx);
//!
//!     let path = PathBuf::from("/home/user/.claude/history.jsonl");
//!     debouncer.send(path.clone(), 1).await.unwrap();
//!     debouncer.send(path.clone(), 2).await.unwrap();
//!
//!     // One emission for the burst, carrying the last value
//!     let (key, value) = output_rx.recv().await.unwrap();
//!     assert_eq!(key, path);
//!     assert_eq!(value, 2);
//! }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default debounce interval in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Capacity of the debouncer's input channel.
const INPUT_CHANNEL_CAPACITY: usize = 1000;

/// Error type for debouncer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebouncerError {
    /// The debouncer's input channel has been closed.
    #[error("debouncer channel closed")]
    ChannelClosed,
}

/// An entry in the scheduling table.
struct Scheduled<V> {
    /// Distinguishes this schedule from later ones for the same key.
    generation: u64,
    /// Value emitted when the task fires.
    value: V,
    /// The sleeping task; aborted when the key is rescheduled.
    handle: JoinHandle<()>,
}

type Table<K, V> = Arc<Mutex<HashMap<K, Scheduled<V>>>>;

/// A debouncer that coalesces rapid events by key.
///
/// # Type Parameters
///
/// * `K` - The key type used to group events (e.g., `PathBuf` for file paths)
/// * `V` - The value type for events
#[derive(Debug)]
pub struct Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Channel for sending events to the background loop.
    input_tx: mpsc::Sender<(K, V)>,
}

impl<K, V> Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
    V: Send + 'static,
{
    /// Creates a new debouncer with the specified interval.
    ///
    /// Must be called from within a Tokio runtime; the scheduling loop is
    /// spawned immediately.
    #[must_use]
    pub fn new(interval: Duration, output_tx: mpsc::Sender<(K, V)>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);

        tokio::spawn(run_debounce_loop(interval, input_rx, output_tx));

        Self { input_tx }
    }

    /// Sends an event to be debounced.
    ///
    /// # Errors
    ///
    /// Returns [`DebouncerError::ChannelClosed`] if the background loop has
    /// terminated.
    pub async fn send(&self, key: K, value: V) -> Result<(), DebouncerError> {
        self.input_tx
            .send((key, value))
            .await
            .map_err(|_| DebouncerError::ChannelClosed)
    }

    /// Attempts to send an event without waiting.
    ///
    /// Usable from synchronous callbacks such as the notify event handler.
    /// Returns `false` if the channel is full or closed.
    pub fn try_send(&self, key: K, value: V) -> bool {
        self.input_tx.try_send((key, value)).is_ok()
    }
}

/// Receives events and maintains the scheduling table until the input closes.
async fn run_debounce_loop<K, V>(
    interval: Duration,
    mut input_rx: mpsc::Receiver<(K, V)>,
    output_tx: mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
    V: Send + 'static,
{
    let table: Table<K, V> = Arc::new(Mutex::new(HashMap::new()));
    let mut next_generation: u64 = 0;

    debug!(interval_ms = interval.as_millis(), "Starting debounce loop");

    while let Some((key, value)) = input_rx.recv().await {
        next_generation += 1;
        let generation = next_generation;

        // The task is spawned under the lock so it cannot claim the entry
        // before it is inserted.
        let previous = {
            let mut guard = table.lock().unwrap_or_else(PoisonError::into_inner);
            let handle = tokio::spawn(fire_after(
                interval,
                key.clone(),
                generation,
                Arc::clone(&table),
                output_tx.clone(),
            ));
            guard.insert(
                key.clone(),
                Scheduled {
                    generation,
                    value,
                    handle,
                },
            )
        };

        if let Some(previous) = previous {
            trace!(key = ?key, "Rescheduled pending event");
            previous.handle.abort();
        } else {
            trace!(key = ?key, "Scheduled event");
        }
    }

    debug!("Input channel closed, flushing pending events");
    flush_all_pending(&table, &output_tx).await;
    debug!("Debounce loop terminated");
}

/// Body of a scheduled task: wait out the interval, claim the entry, emit.
async fn fire_after<K, V>(
    interval: Duration,
    key: K,
    generation: u64,
    table: Table<K, V>,
    output_tx: mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    tokio::time::sleep(interval).await;

    let value = {
        let mut guard = table.lock().unwrap_or_else(PoisonError::into_inner);
        let current = guard
            .get(&key)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            guard.remove(&key).map(|entry| entry.value)
        } else {
            None
        }
    };

    // Superseded between waking and claiming the entry.
    let Some(value) = value else {
        return;
    };

    trace!(key = ?key, "Emitting debounced event");
    if let Err(e) = output_tx.send((key.clone(), value)).await {
        warn!(key = ?key, error = %e, "Failed to emit debounced event");
    }
}

/// Emits every pending value immediately, cancelling the scheduled tasks.
async fn flush_all_pending<K, V>(table: &Table<K, V>, output_tx: &mpsc::Sender<(K, V)>)
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    let drained: Vec<(K, V)> = {
        let mut guard = table.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .drain()
            .map(|(key, entry)| {
                entry.handle.abort();
                (key, entry.value)
            })
            .collect()
    };

    for (key, value) in drained {
        trace!(key = ?key, "Flushing pending event");
        if let Err(e) = output_tx.send((key.clone(), value)).await {
            warn!(key = ?key, error = %e, "Failed to flush pending event");
        }
    }
}
