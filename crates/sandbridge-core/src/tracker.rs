//! Unsubscribe tracker.
//!
//! For every live client, records which channel subscription each
//! registry-level listener became, so tearing the client down (or revoking
//! the listener) removes exactly those subscriptions.

use std::collections::{BTreeMap, HashMap};

use sandbridge_protocols::{ClientId, ListenerId, SubscriptionId};

#[derive(Debug, Default)]
pub struct UnsubscribeTracker {
    entries: HashMap<ClientId, BTreeMap<ListenerId, SubscriptionId>>,
}

impl UnsubscribeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a client with no attachments.
    pub fn open(&mut self, client_id: &str) {
        self.entries.entry(client_id.to_string()).or_default();
    }

    /// Record that `listener` is attached to `client_id` as `subscription`.
    pub fn record(&mut self, client_id: &str, listener: ListenerId, subscription: SubscriptionId) {
        self.entries
            .entry(client_id.to_string())
            .or_default()
            .insert(listener, subscription);
    }

    /// Forget `listener` on every client, returning where it was attached.
    pub fn take_listener(&mut self, listener: ListenerId) -> Vec<(ClientId, SubscriptionId)> {
        let mut taken: Vec<(ClientId, SubscriptionId)> = self
            .entries
            .iter_mut()
            .filter_map(|(client_id, attachments)| {
                attachments
                    .remove(&listener)
                    .map(|subscription| (client_id.clone(), subscription))
            })
            .collect();
        taken.sort();
        taken
    }

    /// Stop tracking a client, returning all of its attachments.
    pub fn close(&mut self, client_id: &str) -> Vec<(ListenerId, SubscriptionId)> {
        self.entries
            .remove(client_id)
            .map(|attachments| attachments.into_iter().collect())
            .unwrap_or_default()
    }

    /// Listener ids attached to `client_id`, or `None` if it is not tracked.
    pub fn listener_ids(&self, client_id: &str) -> Option<Vec<ListenerId>> {
        self.entries
            .get(client_id)
            .map(|attachments| attachments.keys().copied().collect())
    }

    /// Whether `listener` is attached to any client.
    pub fn contains_listener(&self, listener: ListenerId) -> bool {
        self.entries
            .values()
            .any(|attachments| attachments.contains_key(&listener))
    }
}
