//! Revoke handles returned by [`ClientManager::add_listener`].
//!
//! A handle stores only the listener id and a weak reference to the manager.
//! Revoking looks the listener up in the manager's current state, so a handle
//! can never act on stale data, and using it after the client or the manager
//! is gone is a no-op.
//!
//! [`ClientManager::add_listener`]: crate::ClientManager::add_listener

use std::fmt;
use std::sync::Weak;

use sandbridge_protocols::{ClientId, ListenerId};

use crate::manager::ManagerInner;

/// Where a listener was registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Standing listener: every current and future client.
    Global,
    /// One specific client, present or not yet created.
    Client(ClientId),
}

/// Handle that revokes one `add_listener` registration.
#[derive(Clone)]
pub struct Subscription {
    id: ListenerId,
    scope: SubscriptionScope,
    evicted: Option<ListenerId>,
    manager: Weak<ManagerInner>,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, scope: SubscriptionScope, manager: Weak<ManagerInner>) -> Self {
        Self {
            id,
            scope,
            evicted: None,
            manager,
        }
    }

    pub(crate) fn with_evicted(mut self, evicted: Option<ListenerId>) -> Self {
        self.evicted = evicted;
        self
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    /// The queued listener dropped to make room for this one, if the
    /// client's pending limit was reached.
    pub fn evicted(&self) -> Option<ListenerId> {
        self.evicted
    }

    /// Whether the listener is still queued or attached somewhere.
    pub fn is_active(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|manager| manager.is_live(self.id))
    }

    /// Revoke the listener everywhere it is queued or attached.
    ///
    /// Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.revoke(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("evicted", &self.evicted)
            .finish()
    }
}
