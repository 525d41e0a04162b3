//! Listener queue.
//!
//! Holds registrations that cannot be attached yet. `global` entries apply to
//! every client created in the future and are never consumed by attachment.
//! `per_client` entries wait for one specific client id and are drained
//! exactly once, when that client is created.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sandbridge_protocols::{ClientId, ListenerId};

use crate::channel::ListenerCallback;

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueueSlot {
    Global,
    PerClient(ClientId),
}

/// Result of a per-client enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: ListenerId,
    /// Oldest entry dropped because the client's slot was full.
    pub evicted: Option<ListenerId>,
}

/// Pending listener registrations.
pub struct ListenerQueue {
    global: BTreeMap<ListenerId, ListenerCallback>,
    per_client: HashMap<ClientId, BTreeMap<ListenerId, ListenerCallback>>,
    index: HashMap<ListenerId, QueueSlot>,
    max_pending_per_client: usize,
    next_id: u64,
}

impl ListenerQueue {
    /// Create a queue. `max_pending_per_client == 0` means unbounded.
    pub fn new(max_pending_per_client: usize) -> Self {
        Self {
            global: BTreeMap::new(),
            per_client: HashMap::new(),
            index: HashMap::new(),
            max_pending_per_client,
            next_id: 1,
        }
    }

    /// Allocate a listener id unique within this queue.
    ///
    /// Also used for listeners attached straight away, so one counter covers
    /// every registration of a manager.
    pub fn allocate_id(&mut self) -> ListenerId {
        let id = ListenerId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Queue a listener for every future client.
    pub fn enqueue_global(&mut self, callback: ListenerCallback) -> ListenerId {
        let id = self.allocate_id();
        self.global.insert(id, callback);
        self.index.insert(id, QueueSlot::Global);
        id
    }

    /// Queue a listener for one not-yet-existing client.
    ///
    /// When the client's slot is at capacity the oldest entry is evicted.
    pub fn enqueue_per_client(&mut self, client_id: &str, callback: ListenerCallback) -> Enqueued {
        let id = self.allocate_id();
        let slot = self.per_client.entry(client_id.to_string()).or_default();

        let evicted = if self.max_pending_per_client > 0 && slot.len() >= self.max_pending_per_client
        {
            slot.pop_first().map(|(oldest, _)| oldest)
        } else {
            None
        };
        slot.insert(id, callback);

        if let Some(oldest) = evicted {
            self.index.remove(&oldest);
        }
        self.index
            .insert(id, QueueSlot::PerClient(client_id.to_string()));

        Enqueued { id, evicted }
    }

    /// Remove a listener from whichever queue holds it.
    ///
    /// Returns `false` if it was already flushed or revoked.
    pub fn dequeue(&mut self, id: ListenerId) -> bool {
        match self.index.remove(&id) {
            Some(QueueSlot::Global) => self.global.remove(&id).is_some(),
            Some(QueueSlot::PerClient(client_id)) => {
                let Some(slot) = self.per_client.get_mut(&client_id) else {
                    return false;
                };
                let removed = slot.remove(&id).is_some();
                if slot.is_empty() {
                    self.per_client.remove(&client_id);
                }
                removed
            }
            None => false,
        }
    }

    /// Remove and return every entry waiting for `client_id`, oldest first.
    pub fn drain_per_client(&mut self, client_id: &str) -> Vec<(ListenerId, ListenerCallback)> {
        let Some(slot) = self.per_client.remove(client_id) else {
            return Vec::new();
        };
        for id in slot.keys() {
            self.index.remove(id);
        }
        slot.into_iter().collect()
    }

    /// Current global entries, oldest first. Nothing is removed.
    pub fn snapshot_global(&self) -> Vec<(ListenerId, ListenerCallback)> {
        self.global
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.index.contains_key(&id)
    }

    /// IDs in the global queue.
    pub fn global_ids(&self) -> Vec<ListenerId> {
        self.global.keys().copied().collect()
    }

    /// IDs waiting for `client_id`.
    pub fn pending_for(&self, client_id: &str) -> Vec<ListenerId> {
        self.per_client
            .get(client_id)
            .map(|slot| slot.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Client ids that have listeners waiting, sorted.
    pub fn pending_client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.per_client.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total queued entries, global and per-client.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for ListenerQueue {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for ListenerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerQueue")
            .field("global", &self.global.len())
            .field("per_client", &self.pending_client_ids())
            .field("max_pending_per_client", &self.max_pending_per_client)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn noop() -> ListenerCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn test_enqueue_global() {
        let mut queue = ListenerQueue::default();
        let a = queue.enqueue_global(noop());
        let b = queue.enqueue_global(noop());

        assert_eq!(queue.global_ids(), vec![a, b]);
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(a));
    }

    #[test]
    fn test_ids_are_unique_per_queue() {
        let mut queue = ListenerQueue::default();
        let a = queue.enqueue_global(noop());
        let b = queue.enqueue_per_client("x", noop()).id;
        let c = queue.allocate_id();
        assert!(a < b && b < c);

        let mut other = ListenerQueue::default();
        assert_eq!(other.allocate_id(), ListenerId::new(1));
    }

    #[test]
    fn test_snapshot_global_does_not_consume() {
        let mut queue = ListenerQueue::default();
        let id = queue.enqueue_global(noop());

        assert_eq!(queue.snapshot_global().len(), 1);
        assert_eq!(queue.snapshot_global()[0].0, id);
        assert_eq!(queue.global_ids(), vec![id]);
    }

    #[test]
    fn test_drain_per_client_consumes_once() {
        let mut queue = ListenerQueue::default();
        let a = queue.enqueue_per_client("a", noop()).id;
        let b = queue.enqueue_per_client("b", noop()).id;

        let drained: Vec<_> = queue.drain_per_client("a").into_iter().map(|(id, _)| id).collect();
        assert_eq!(drained, vec![a]);
        assert!(queue.drain_per_client("a").is_empty());
        assert!(!queue.contains(a));

        assert_eq!(queue.pending_for("b"), vec![b]);
        assert_eq!(queue.pending_client_ids(), vec!["b"]);
    }

    #[test]
    fn test_drain_unknown_client() {
        let mut queue = ListenerQueue::default();
        assert!(queue.drain_per_client("ghost").is_empty());
    }

    #[test]
    fn test_dequeue_global() {
        let mut queue = ListenerQueue::default();
        let id = queue.enqueue_global(noop());

        assert!(queue.dequeue(id));
        assert!(queue.global_ids().is_empty());
        assert!(!queue.dequeue(id));
    }

    #[test]
    fn test_dequeue_per_client_cleans_empty_slot() {
        let mut queue = ListenerQueue::default();
        let id = queue.enqueue_per_client("a", noop()).id;

        assert!(queue.dequeue(id));
        assert!(queue.pending_client_ids().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_after_drain_is_noop() {
        let mut queue = ListenerQueue::default();
        let id = queue.enqueue_per_client("a", noop()).id;
        queue.drain_per_client("a");

        assert!(!queue.dequeue(id));
    }

    #[test]
    fn test_per_client_cap_evicts_oldest() {
        let mut queue = ListenerQueue::new(2);
        let first = queue.enqueue_per_client("a", noop());
        let second = queue.enqueue_per_client("a", noop());
        assert_eq!(first.evicted, None);
        assert_eq!(second.evicted, None);

        let third = queue.enqueue_per_client("a", noop());
        assert_eq!(third.evicted, Some(first.id));
        assert_eq!(queue.pending_for("a"), vec![second.id, third.id]);
        assert!(!queue.contains(first.id));
        assert!(!queue.dequeue(first.id));

        // Other clients have their own budget.
        assert_eq!(queue.enqueue_per_client("b", noop()).evicted, None);
    }

    #[test]
    fn test_cap_does_not_apply_to_global() {
        let mut queue = ListenerQueue::new(1);
        queue.enqueue_global(noop());
        queue.enqueue_global(noop());
        assert_eq!(queue.global_ids().len(), 2);
    }
}
