//! Event subscriptions: one active subscriber per event name.
//!
//! Registering a subscription for an already-subscribed name replaces the
//! old one (last-registration-wins). Multicast was never a requirement of
//! this layer; callers needing fan-out do it inside their own callback.

use std::collections::HashMap;

/// Map from event name to the single active subscriber.
///
/// Generic over the subscriber value so the registry itself stays free of
/// callback-type details.
#[derive(Debug)]
pub struct SubscriptionRegistry<S> {
    entries: HashMap<String, S>,
}

impl<S> SubscriptionRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register a subscriber for `event`, returning the replaced one if the
    /// name was already subscribed.
    pub fn insert(&mut self, event: &str, subscriber: S) -> Option<S> {
        self.entries.insert(event.to_owned(), subscriber)
    }

    /// Remove and return the subscriber for `event`. `None` if absent.
    pub fn remove(&mut self, event: &str) -> Option<S> {
        self.entries.remove(event)
    }

    /// Look up the subscriber for `event`.
    pub fn get(&self, event: &str) -> Option<&S> {
        self.entries.get(event)
    }

    /// Whether `event` has an active subscriber.
    pub fn contains(&self, event: &str) -> bool {
        self.entries.contains_key(event)
    }

    /// Remove and return every registration.
    pub fn drain(&mut self) -> Vec<(String, S)> {
        self.entries.drain().collect()
    }

    /// Subscribed event names, in unspecified order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no subscriptions are active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn resubscribe_replaces_and_returns_old() {
        let mut registry = SubscriptionRegistry::new();

        assert_eq!(registry.insert("chat", 1), None);
        assert_eq!(registry.insert("chat", 2), Some(1));
        assert_eq!(registry.get("chat"), Some(&2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut registry: SubscriptionRegistry<u32> = SubscriptionRegistry::new();
        assert_eq!(registry.remove("chat"), None);
    }

    #[test]
    fn drain_returns_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("a", 1);
        registry.insert("b", 2);

        let mut drained = registry.drain();
        drained.sort();

        assert_eq!(drained, vec![("a".to_owned(), 1), ("b".to_owned(), 2)]);
        assert!(registry.is_empty());
    }
}
