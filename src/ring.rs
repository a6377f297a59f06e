//! Bounded buffer of recently observed cluster events.
//!
//! Enrichment queries it to attach related events as breadcrumbs; the
//! events watcher pushes every decoded delivery into it, including ones it
//! otherwise drops.

use std::collections::VecDeque;
use std::sync::RwLock;

use k8s_openapi::api::core::v1::Event;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Fixed-capacity FIFO of deep-copied events.
///
/// Writes are frequent and O(1); queries run once per enriched incident and
/// scan the whole buffer under the read lock.
pub struct RecentEventRing {
    capacity: usize,
    slots: RwLock<VecDeque<Event>>,
}

impl Default for RecentEventRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecentEventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn add(&self, event: &Event) {
        let mut slots = self.slots.write().expect("event ring lock poisoned");
        if slots.len() == self.capacity {
            slots.pop_front();
        }
        slots.push_back(event.clone());
    }

    /// All buffered events involving (namespace, kind, name), oldest first.
    /// Returned events are copies; callers may mutate them freely.
    pub fn query(&self, namespace: &str, kind: &str, name: &str) -> Vec<Event> {
        let slots = self.slots.read().expect("event ring lock poisoned");
        slots
            .iter()
            .filter(|event| {
                event.metadata.namespace.as_deref() == Some(namespace)
                    && event.involved_object.kind.as_deref() == Some(kind)
                    && event.involved_object.name.as_deref() == Some(name)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().expect("event ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
