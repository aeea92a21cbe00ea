//! Thread-safe FIFO carrying completions from worker to owner context.
//!
//! The transport library invokes completion hooks on its own worker thread.
//! Those hooks push records into a `Mailbox`; the owning thread's per-tick
//! dispatch pops them. The queue is unbounded and monotonically drained:
//! the dispatch step takes at most one item per category per tick, so a
//! burst of completions cannot starve the caller's frame loop.
//!
//! # Invariants
//!
//! - FIFO: items pop in push order
//! - The lock is held only for the queue operation itself, never while
//!   invoking caller code

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

/// Unbounded thread-safe FIFO queue.
///
/// `push` is callable from any thread. `try_pop_one` and `drain_all` are
/// intended for the owning thread but are safe from anywhere.
#[derive(Debug)]
pub struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()) }
    }

    /// Append an item. Callable from any thread; blocks only for the
    /// duration of the queue operation.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Pop the oldest item, or `None` if the mailbox is empty.
    ///
    /// The per-tick dispatch calls this once per category per tick.
    pub fn try_pop_one(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return everything queued, oldest first.
    ///
    /// Used during teardown so the caller can release owned resources
    /// without dispatching.
    pub fn drain_all(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the mailbox is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A poisoned mailbox holds plain data, so the queue stays usable even
    /// if a pusher panicked mid-operation.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
