//! Per-client message channel.
//!
//! A channel wraps one [`Transport`] endpoint and keeps the ordered set of
//! listeners that receive the client's inbound messages. Slot
//! [`SubscriptionId::HANDSHAKE`] is installed at construction and is never
//! visible to callers: it watches for [`SandboxMessage::Initialized`], marks
//! the channel ready and flushes any outbound messages held back until then.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use sandbridge_config::BridgeConfig;
use sandbridge_protocols::{
    ChannelError, ClientId, HostMessage, SandboxMessage, SubscriptionId, Transport,
};

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// Callback invoked for every inbound message of a channel.
pub type ListenerCallback = Arc<dyn Fn(&SandboxMessage) + Send + Sync>;

/// Channel behaviour derived from [`BridgeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub buffer_until_handshake: bool,
    pub max_buffered_messages: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for ChannelOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            buffer_until_handshake: config.buffer_until_handshake,
            max_buffered_messages: config.max_buffered_messages,
        }
    }
}

#[derive(Clone)]
enum Slot {
    Handshake,
    Listener(ListenerCallback),
}

struct ChannelState {
    slots: BTreeMap<SubscriptionId, Slot>,
    next_id: u64,
    ready: bool,
    flushing: bool,
    closed: bool,
    outbox: VecDeque<HostMessage>,
}

/// Subscribe/send/receive abstraction over one client transport.
pub struct MessageChannel {
    client_id: ClientId,
    transport: Arc<dyn Transport>,
    options: ChannelOptions,
    state: Mutex<ChannelState>,
}

impl MessageChannel {
    /// Create a channel with the handshake slot already installed.
    pub fn new(
        client_id: impl Into<ClientId>,
        transport: Arc<dyn Transport>,
        options: ChannelOptions,
    ) -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(SubscriptionId::HANDSHAKE, Slot::Handshake);

        let ready = !options.buffer_until_handshake;
        Self {
            client_id: client_id.into(),
            transport,
            options,
            state: Mutex::new(ChannelState {
                slots,
                next_id: SubscriptionId::HANDSHAKE.value() + 1,
                ready,
                flushing: false,
                closed: false,
                outbox: VecDeque::new(),
            }),
        }
    }

    /// The client this channel belongs to.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The underlying transport endpoint.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Subscribe a listener. It receives every message delivered from now on.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SandboxMessage) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(callback))
    }

    /// Subscribe an already shared listener.
    pub fn subscribe_arc(&self, callback: ListenerCallback) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = SubscriptionId::new(state.next_id);
        state.next_id += 1;
        state.slots.insert(id, Slot::Listener(callback));
        id
    }

    /// Remove a listener. Unknown ids and the handshake slot are ignored.
    ///
    /// Returns `true` if a listener was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        if id.is_handshake() {
            return false;
        }
        self.state.lock().slots.remove(&id).is_some()
    }

    /// Whether `id` is currently subscribed.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        !id.is_handshake() && self.state.lock().slots.contains_key(&id)
    }

    /// Caller-visible listener count (excludes the handshake slot).
    pub fn listener_count(&self) -> usize {
        self.total_listener_count() - 1
    }

    /// All slots, including the handshake slot.
    pub fn total_listener_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Whether the sandbox has completed its handshake.
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Outbound messages waiting for the handshake.
    pub fn pending_outbound(&self) -> usize {
        self.state.lock().outbox.len()
    }

    /// Send a message to the sandbox.
    ///
    /// Before the handshake the message is held in the outbox and posted once
    /// the sandbox reports [`SandboxMessage::Initialized`]. Messages sent while
    /// the outbox is being flushed join the back of the outbox.
    pub fn send(&self, message: HostMessage) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            if !state.ready || state.flushing {
                let capacity = self.options.max_buffered_messages;
                if state.outbox.len() >= capacity {
                    warn!(
                        client_id = %self.client_id,
                        capacity,
                        kind = message.kind(),
                        "Outbox full, dropping message"
                    );
                    return Err(ChannelError::BufferFull { capacity });
                }
                debug!(
                    client_id = %self.client_id,
                    kind = message.kind(),
                    "Holding message until handshake"
                );
                state.outbox.push_back(message);
                return Ok(());
            }
        }

        self.transport.post(&message)
    }

    /// Deliver an inbound message to every slot, in subscription order.
    ///
    /// Slots are snapshotted first, so listeners may subscribe or unsubscribe
    /// while being called. A listener removed mid-delivery still sees the
    /// current message.
    pub fn deliver(&self, message: &SandboxMessage) {
        let slots: Vec<Slot> = {
            let state = self.state.lock();
            if state.closed {
                debug!(client_id = %self.client_id, "Dropping message for closed channel");
                return;
            }
            state.slots.values().cloned().collect()
        };

        for slot in slots {
            match slot {
                Slot::Handshake => self.on_handshake_message(message),
                Slot::Listener(callback) => callback(message),
            }
        }
    }

    fn on_handshake_message(&self, message: &SandboxMessage) {
        if !matches!(message, SandboxMessage::Initialized) {
            return;
        }

        {
            let mut state = self.state.lock();
            if state.ready || state.flushing || state.closed {
                return;
            }
            state.flushing = true;
        }

        // Drain in batches until the outbox stays empty; `ready` flips only
        // under the same lock that observes it empty.
        let mut flushed = 0;
        loop {
            let batch: Vec<HostMessage> = {
                let mut state = self.state.lock();
                if state.outbox.is_empty() || state.closed {
                    state.flushing = false;
                    state.ready = !state.closed;
                    break;
                }
                state.outbox.drain(..).collect()
            };

            for message in batch {
                flushed += 1;
                if let Err(e) = self.transport.post(&message) {
                    warn!(
                        client_id = %self.client_id,
                        kind = message.kind(),
                        "Failed to flush message: {}", e
                    );
                }
            }
        }

        debug!(client_id = %self.client_id, flushed, "Handshake complete");
    }

    /// Close the channel: drop listeners and outbox, release the transport.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.slots.retain(|id, _| id.is_handshake());
            state.outbox.clear();
        }
        self.transport.close();
        debug!(client_id = %self.client_id, "Channel closed");
    }
}

impl fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageChannel")
            .field("client_id", &self.client_id)
            .field("listeners", &(state.slots.len() - 1))
            .field("ready", &state.ready)
            .field("closed", &state.closed)
            .field("outbox", &state.outbox.len())
            .finish()
    }
}
