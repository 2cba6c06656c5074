//! Request de-duplication.
//!
//! [`SingleFlight`] coalesces concurrent operations that share a key into a
//! single execution. The first caller for a key becomes the leader and runs
//! the operation; callers arriving while it runs attach to it and receive a
//! clone of its result.
//!
//! ```text
//!   caller A ──┐                    ┌──▶ Ok(v) / Err(e)
//!   caller B ──┼──▶ in_flight[key] ─┼──▶ Ok(v) / Err(e)
//!   caller C ──┘    (one leader)    └──▶ Ok(v) / Err(e)
//! ```
//!
//! The in-flight entry is removed only after the leader's future has fully
//! completed, so a leader that stores its result somewhere (a cache, a tree
//! node) inside the operation publishes it before new callers can miss.
//!
//! If the leader's future is dropped before completing, waiters are woken
//! and one of them takes over as the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// State shared between the leader and the waiters of one operation.
struct Flight<V, E> {
    notify: Notify,
    finished: AtomicBool,
    result: Mutex<Option<Result<V, E>>>,
}

impl<V: Clone, E: Clone> Flight<V, E> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            finished: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    /// Wait for the leader. `None` means the leader was dropped.
    async fn wait(&self) -> Option<Result<V, E>> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking so a completion between the check and
        // the await is not missed.
        notified.as_mut().enable();

        if !self.finished.load(Ordering::SeqCst) {
            notified.await;
        }
        lock(&self.result).clone()
    }
}

/// Coalesces concurrent operations by key.
pub struct SingleFlight<K, V, E> {
    in_flight: Mutex<HashMap<K, Arc<Flight<V, E>>>>,
    executions: AtomicU64,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            executions: AtomicU64::new(0),
        }
    }

    /// Run `operation` for `key`, or attach to the run already in flight.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let flight = loop {
            let existing = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(&key) {
                    Some(flight) => flight.clone(),
                    None => {
                        let flight = Arc::new(Flight::new());
                        in_flight.insert(key.clone(), flight.clone());
                        break flight;
                    }
                }
            };

            if let Some(result) = existing.wait().await {
                return result;
            }
            // Leader abandoned the operation; try to become the leader.
        };

        self.executions.fetch_add(1, Ordering::SeqCst);
        let mut guard = LeaderGuard {
            owner: self,
            key: &key,
            flight: &flight,
            completed: false,
        };

        let result = operation().await;
        *lock(&flight.result) = Some(result.clone());
        guard.completed = true;
        drop(guard);

        result
    }

    /// Whether an operation for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    /// Number of operations currently running.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Total number of operations actually executed (leaders elected).
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight entry and wakes waiters when the leader finishes,
/// including when its future is dropped mid-operation.
struct LeaderGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
{
    owner: &'a SingleFlight<K, V, E>,
    key: &'a K,
    flight: &'a Arc<Flight<V, E>>,
    completed: bool,
}

impl<K, V, E> Drop for LeaderGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        {
            let mut in_flight = lock(&self.owner.in_flight);
            if in_flight
                .get(self.key)
                .is_some_and(|current| Arc::ptr_eq(current, self.flight))
            {
                in_flight.remove(self.key);
            }
        }
        if !self.completed {
            *lock(&self.flight.result) = None;
        }
        self.flight.finished.store(true, Ordering::SeqCst);
        self.flight.notify.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
