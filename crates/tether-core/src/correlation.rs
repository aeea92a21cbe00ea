//! Correlation of in-flight requests and notifies with their callbacks.
//!
//! Every `request`/`notify` call mints a [`CorrelationId`] and registers the
//! caller's callback in a [`CorrelationTable`]. The entry is removed exactly
//! once: by the per-tick dispatch when the completion arrives (normal path),
//! or by the forced drain during `stop()` (teardown path). An entry still
//! present at final teardown means the transport broke its completion
//! contract; the session logs and discards it without invoking.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier linking a sent request or notify to its completion.
///
/// Process-unique; never reused across connect/stop cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Mint a fresh, process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Map from in-flight correlation handle to its pending entry.
///
/// Generic over the entry type so the request and notify tables share one
/// implementation, differing only in the callback value they store.
#[derive(Debug)]
pub struct CorrelationTable<P> {
    entries: HashMap<CorrelationId, P>,
}

impl<P> CorrelationTable<P> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register a pending entry under `id`.
    ///
    /// Ids are process-unique, so an occupied slot is a caller bug; the old
    /// entry is returned rather than silently dropped.
    pub fn insert(&mut self, id: CorrelationId, pending: P) -> Option<P> {
        self.entries.insert(id, pending)
    }

    /// Remove and return the entry for `id`, if still registered.
    pub fn remove(&mut self, id: CorrelationId) -> Option<P> {
        self.entries.remove(&id)
    }

    /// Remove and return every entry, in unspecified order.
    pub fn drain(&mut self) -> Vec<(CorrelationId, P)> {
        self.entries.drain().collect()
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P> Default for CorrelationTable<P> {
    fn default() -> Self {
        Self::new()
    }
}
