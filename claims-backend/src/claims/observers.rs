//! Observer registry for store events.
//!
//! Callbacks fire synchronously on whichever task produced the event, in
//! subscription order. The registry lock is released before any callback
//! runs, so a callback may subscribe or unsubscribe.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A full load replaced the in-memory map
    Loaded { count: usize },
    /// A claim was created or changed in memory
    ClaimSaved { id: String },
    ClaimDeleted { id: String },
    /// Every file in a persist cycle was written
    PersistSucceeded { files: Vec<PathBuf> },
    /// At least one file in a persist cycle failed after retries
    PersistFailed { failed: Vec<PathBuf> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: DashMap<SubscriptionId, Callback>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.observers.insert(id, Arc::new(callback));
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn emit(&self, event: &StoreEvent) {
        let mut callbacks: Vec<(SubscriptionId, Callback)> = self
            .observers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        callbacks.sort_by_key(|(id, _)| *id);

        for (_, callback) in callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_in_subscription_order() {
        let registry = ObserverRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = seen.clone();
            registry.subscribe(move |event| {
                if let StoreEvent::ClaimSaved { id } = event {
                    seen.lock().push(format!("{name}:{id}"));
                }
            });
        }

        registry.emit(&StoreEvent::ClaimSaved { id: "C_1".to_string() });
        assert_eq!(*seen.lock(), vec!["first:C_1", "second:C_1"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = registry.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&StoreEvent::Loaded { count: 0 });
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.emit(&StoreEvent::Loaded { count: 0 });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let registry = Arc::new(ObserverRegistry::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let own_id = slot.clone();
        let id = registry.subscribe(move |_| {
            if let Some(id) = *own_id.lock() {
                reg.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        registry.emit(&StoreEvent::ClaimDeleted { id: "C_3".to_string() });
        assert_eq!(registry.len(), 0);
    }
}
