//! Named-signal broadcaster
//!
//! [`EventBus`] is the single point of cross-component communication: the
//! driver's event pump publishes [`SignalEvent`]s, one-shot waiters (see
//! [`crate::wait::Waiter`]) register for a single occurrence of a [`Signal`],
//! and passive observers (a UI, a logger) consume everything through a
//! broadcast channel obtained from [`EventBus::watch`].
//!
//! Dispatch iterates over a snapshot: the once-waiter entries for a signal are
//! removed from the registry before any of them is fulfilled, so a consumer
//! that cancels another waiter while handling its own settlement cannot
//! corrupt the list being dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, oneshot};

use odemon_core::prelude::*;
use odemon_core::{Signal, SignalEvent};

/// Global waiter ID counter
static WAITER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique waiter ID
fn next_waiter_id() -> u64 {
    WAITER_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A registered once-waiter: fulfilled on the next occurrence of its signal,
/// then removed.
struct OnceEntry {
    id: u64,
    tx: oneshot::Sender<SignalEvent>,
}

/// Single-producer multi-consumer named-signal broadcaster.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// Once-waiters keyed by signal, fulfilled and removed on publish
    waiters: Mutex<HashMap<Signal, Vec<OnceEntry>>>,
    /// Fan-out to passive observers; errors are ignored when nobody watches
    observers: broadcast::Sender<SignalEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (observers, _rx) = broadcast::channel(256);
        Self {
            inner: Arc::new(BusInner {
                waiters: Mutex::new(HashMap::new()),
                observers,
            }),
        }
    }

    /// Publish one event: fulfill and remove every once-waiter registered for
    /// its signal, then forward to observers.
    ///
    /// Delivery to waiters is synchronous with this call. Each waiter settles
    /// at most once; a second occurrence of the signal finds no entry left.
    pub fn publish(&self, event: SignalEvent) {
        let signal = event.signal();
        trace!("publish {}", signal);

        // Snapshot: entries leave the registry before any receiver runs.
        let entries = {
            let mut waiters = self.inner.waiters.lock().expect("bus lock poisoned");
            waiters.remove(&signal).unwrap_or_default()
        };
        for entry in entries {
            // A dropped receiver just means the waiter was cancelled
            // concurrently; nothing to do.
            let _ = entry.tx.send(event.clone());
        }

        let _ = self.inner.observers.send(event);
    }

    /// Subscribe as a passive observer of every published event.
    pub fn watch(&self) -> broadcast::Receiver<SignalEvent> {
        self.inner.observers.subscribe()
    }

    /// Register a once-waiter for `signal`.
    ///
    /// Returns the entry ID (for [`deregister`](Self::deregister)) and the
    /// receiving half that settles on the next occurrence.
    pub(crate) fn register(&self, signal: Signal) -> (u64, oneshot::Receiver<SignalEvent>) {
        let id = next_waiter_id();
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.inner.waiters.lock().expect("bus lock poisoned");
        waiters.entry(signal).or_default().push(OnceEntry { id, tx });

        (id, rx)
    }

    /// Remove a once-waiter by ID. Idempotent: removing an entry that already
    /// settled (or was already removed) is a no-op.
    pub(crate) fn deregister(&self, signal: Signal, id: u64) {
        let mut waiters = self.inner.waiters.lock().expect("bus lock poisoned");
        if let Some(entries) = waiters.get_mut(&signal) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                waiters.remove(&signal);
            }
        }
    }

    /// Number of once-waiters currently registered for `signal`.
    ///
    /// Used by tests to assert that races leave no dangling subscriptions.
    pub fn waiter_count(&self, signal: Signal) -> usize {
        let waiters = self.inner.waiters.lock().expect("bus lock poisoned");
        waiters.get(&signal).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
