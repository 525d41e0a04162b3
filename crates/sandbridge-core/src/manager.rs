//! Client lifecycle manager.
//!
//! [`ClientManager`] is the public surface. It decides where each listener
//! lands (attached now, queued for one client, or standing for all clients),
//! remembers which channel subscriptions belong to which client, and
//! broadcasts compile requests.
//!
//! All bookkeeping for one call happens under a single state lock. The lock
//! is never held while posting to a transport or delivering a message, so
//! listeners and transports may call back into the manager. Compile
//! broadcasts and late-client replays are serialized by a separate reentrant
//! lock, so a client never receives an older compile request after a newer one.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sandbridge_config::BridgeConfig;
use sandbridge_protocols::{
    ChannelError, ClientError, ClientId, CompileRequest, HostMessage, ListenerId, SandboxMessage,
    SandboxSetup, Transport,
};

use crate::channel::{ChannelOptions, ListenerCallback};
use crate::queue::ListenerQueue;
use crate::registry::{Client, ClientRegistry};
use crate::subscription::{Subscription, SubscriptionScope};
use crate::tracker::UnsubscribeTracker;

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

/// Whether `run` has been called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerStatus {
    Idle,
    Running,
}

/// Outcome of one [`ClientManager::run`] broadcast.
#[derive(Debug)]
pub struct RunReport {
    pub request_id: Uuid,
    /// Clients the request was handed to (posted or held for the handshake).
    pub dispatched: usize,
    pub failed: Vec<(ClientId, ChannelError)>,
}

struct ManagerState {
    queue: ListenerQueue,
    tracker: UnsubscribeTracker,
    status: ManagerStatus,
    setup: SandboxSetup,
    last_request: Option<CompileRequest>,
}

pub(crate) struct ManagerInner {
    config: BridgeConfig,
    registry: ClientRegistry,
    state: Mutex<ManagerState>,
    compile_order: ReentrantMutex<()>,
}

impl ManagerInner {
    pub(crate) fn revoke(&self, listener: ListenerId) {
        let mut state = self.state.lock();
        let dequeued = state.queue.dequeue(listener);
        let attachments = state.tracker.take_listener(listener);

        for (client_id, subscription) in &attachments {
            if let Some(client) = self.registry.get(client_id) {
                client.channel().unsubscribe(*subscription);
            }
        }

        if dequeued || !attachments.is_empty() {
            debug!(
                %listener,
                dequeued,
                detached = attachments.len(),
                "Listener revoked"
            );
        }
    }

    pub(crate) fn is_live(&self, listener: ListenerId) -> bool {
        let state = self.state.lock();
        state.queue.contains(listener) || state.tracker.contains_listener(listener)
    }
}

/// Registry, listener queue and lifecycle controller for sandbox clients.
///
/// Dropping the manager unregisters every client.
pub struct ClientManager {
    inner: Arc<ManagerInner>,
}

impl ClientManager {
    pub fn new(config: BridgeConfig) -> Self {
        let options = ChannelOptions::from(&config);
        let queue = ListenerQueue::new(config.max_pending_per_client);
        Self {
            inner: Arc::new(ManagerInner {
                registry: ClientRegistry::new(options),
                state: Mutex::new(ManagerState {
                    queue,
                    tracker: UnsubscribeTracker::new(),
                    status: ManagerStatus::Idle,
                    setup: SandboxSetup::default(),
                    last_request: None,
                }),
                compile_order: ReentrantMutex::new(()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Add a listener for one client (`Some(id)`) or for all clients (`None`).
    ///
    /// - existing client: attached now;
    /// - unknown client: queued until that client registers;
    /// - no id: attached to every current client and kept for future ones.
    pub fn add_listener<F>(&self, callback: F, client_id: Option<&str>) -> Subscription
    where
        F: Fn(&SandboxMessage) + Send + Sync + 'static,
    {
        let callback: ListenerCallback = Arc::new(callback);
        let mut state = self.inner.state.lock();

        let (id, scope, evicted) = match client_id {
            Some(client_id) => {
                let scope = SubscriptionScope::Client(client_id.to_string());
                match self.inner.registry.get(client_id) {
                    Some(client) => {
                        let id = state.queue.allocate_id();
                        let subscription = client.channel().subscribe_arc(callback);
                        state.tracker.record(client_id, id, subscription);
                        debug!(%id, client_id, "Listener attached");
                        (id, scope, None)
                    }
                    None => {
                        let enqueued = state.queue.enqueue_per_client(client_id, callback);
                        if let Some(evicted) = enqueued.evicted {
                            warn!(
                                %evicted,
                                client_id,
                                limit = self.inner.config.max_pending_per_client,
                                "Pending listener limit reached, dropped oldest"
                            );
                        }
                        debug!(id = %enqueued.id, client_id, "Listener queued for client");
                        (enqueued.id, scope, enqueued.evicted)
                    }
                }
            }
            None => {
                let id = state.queue.enqueue_global(callback.clone());
                let clients = self.inner.registry.clients();
                for client in &clients {
                    let subscription = client.channel().subscribe_arc(callback.clone());
                    state.tracker.record(client.id(), id, subscription);
                }
                debug!(%id, attached = clients.len(), "Standing listener added");
                (id, SubscriptionScope::Global, None)
            }
        };

        drop(state);
        Subscription::new(id, scope, Arc::downgrade(&self.inner)).with_evicted(evicted)
    }

    /// Shorthand for `add_listener(callback, None)`.
    pub fn listen<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SandboxMessage) + Send + Sync + 'static,
    {
        self.add_listener(callback, None)
    }

    /// Register a client and flush its queued listeners onto the new channel.
    ///
    /// Listeners waiting for this id are attached first, then every standing
    /// listener. If `run` has already happened and `run_on_register` is set,
    /// the last compile request is sent to the new client. Registration waits
    /// for an in-flight `run` to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateClient`] if `client_id` is registered.
    pub fn register_client(
        &self,
        client_id: impl Into<ClientId>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Client>, ClientError> {
        let client_id = client_id.into();
        let _order = self.inner.compile_order.lock();

        let (client, replay) = {
            let mut state = self.inner.state.lock();
            let client = self.inner.registry.create(client_id.clone(), transport)?;
            let channel = client.channel();
            state.tracker.open(&client_id);

            for (listener, callback) in state.queue.drain_per_client(&client_id) {
                let subscription = channel.subscribe_arc(callback);
                state.tracker.record(&client_id, listener, subscription);
            }
            for (listener, callback) in state.queue.snapshot_global() {
                let subscription = channel.subscribe_arc(callback);
                state.tracker.record(&client_id, listener, subscription);
            }

            let replay = if state.status == ManagerStatus::Running && self.inner.config.run_on_register
            {
                state.last_request.clone()
            } else {
                None
            };
            (client, replay)
        };

        info!(
            client_id = %client_id,
            listeners = client.channel().listener_count(),
            "Client registered"
        );

        if let Some(request) = replay {
            let request_id = request.request_id;
            if let Err(e) = client.channel().send(HostMessage::Compile(request)) {
                warn!(client_id = %client_id, %request_id, "Failed to replay compile request: {}", e);
            }
        }

        Ok(client)
    }

    /// Tear down one client: revoke its tracked listeners, drop it from the
    /// registry and close its channel. Returns `false` if it was not registered.
    pub fn unregister_client(&self, client_id: &str) -> bool {
        let (client, revoked) = {
            let mut state = self.inner.state.lock();
            let attachments = state.tracker.close(client_id);
            let Some(client) = self.inner.registry.remove(client_id) else {
                return false;
            };
            for (_, subscription) in &attachments {
                client.channel().unsubscribe(*subscription);
            }
            (client, attachments.len())
        };

        client.channel().close();
        info!(client_id, revoked, "Client unregistered");
        true
    }

    /// Unregister every client. Returns how many were removed.
    pub fn unregister_all(&self) -> usize {
        self.inner
            .registry
            .list()
            .iter()
            .filter(|id| self.unregister_client(id))
            .count()
    }

    /// Unregister every client and return to [`ManagerStatus::Idle`].
    ///
    /// Queued listeners are kept and will attach to clients registered later.
    pub fn shutdown(&self) {
        let removed = self.unregister_all();
        let mut state = self.inner.state.lock();
        state.status = ManagerStatus::Idle;
        state.last_request = None;
        if removed > 0 {
            info!(removed, "Client manager shut down");
        }
    }

    /// Replace the files used by the next [`run`](Self::run).
    pub fn update_setup(&self, setup: SandboxSetup) {
        self.inner.state.lock().setup = setup;
    }

    /// Broadcast a fresh compile request to every registered client.
    ///
    /// Failures are logged and reported, never retried.
    pub fn run(&self) -> RunReport {
        let _order = self.inner.compile_order.lock();
        let (request, clients) = {
            let mut state = self.inner.state.lock();
            let request = CompileRequest::new(state.setup.clone());
            state.status = ManagerStatus::Running;
            state.last_request = Some(request.clone());
            (request, self.inner.registry.clients())
        };

        info!(
            request_id = %request.request_id,
            clients = clients.len(),
            "Running sandboxes"
        );

        let mut report = RunReport {
            request_id: request.request_id,
            dispatched: 0,
            failed: Vec::new(),
        };

        for client in clients {
            match client.channel().send(HostMessage::Compile(request.clone())) {
                Ok(()) => report.dispatched += 1,
                Err(e) => {
                    warn!(client_id = client.id(), "Failed to send compile request: {}", e);
                    report.failed.push((client.id().to_string(), e));
                }
            }
        }

        report
    }

    /// Send a message to one client, or to all when `client_id` is `None`.
    ///
    /// Returns how many clients accepted it. Broadcast failures are logged.
    ///
    /// # Errors
    ///
    /// For a targeted send: [`ClientError::NotFound`] or the channel failure.
    pub fn dispatch(
        &self,
        message: HostMessage,
        client_id: Option<&str>,
    ) -> Result<usize, ClientError> {
        match client_id {
            Some(client_id) => {
                let client = self
                    .inner
                    .registry
                    .get(client_id)
                    .ok_or_else(|| ClientError::NotFound(client_id.to_string()))?;
                client
                    .channel()
                    .send(message)
                    .map_err(|e| ClientError::channel(client_id, e))?;
                Ok(1)
            }
            None => {
                let mut sent = 0;
                for client in self.inner.registry.clients() {
                    match client.channel().send(message.clone()) {
                        Ok(()) => sent += 1,
                        Err(e) => warn!(
                            client_id = client.id(),
                            kind = message.kind(),
                            "Failed to dispatch message: {}", e
                        ),
                    }
                }
                Ok(sent)
            }
        }
    }

    /// Deliver an inbound message from a client's sandbox to its listeners.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] if the client is not registered.
    pub fn receive(&self, client_id: &str, message: &SandboxMessage) -> Result<(), ClientError> {
        let client = self
            .inner
            .registry
            .get(client_id)
            .ok_or_else(|| ClientError::NotFound(client_id.to_string()))?;
        client.channel().deliver(message);
        Ok(())
    }

    pub fn status(&self) -> ManagerStatus {
        self.inner.state.lock().status
    }

    pub fn client(&self, client_id: &str) -> Option<Arc<Client>> {
        self.inner.registry.get(client_id)
    }

    /// Registered client ids, sorted.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.inner.registry.list()
    }

    /// Caller-visible listener count of a client's channel.
    pub fn listener_count(&self, client_id: &str) -> Option<usize> {
        self.inner
            .registry
            .get(client_id)
            .map(|client| client.channel().listener_count())
    }

    /// Standing listeners waiting in the global queue.
    pub fn global_listener_ids(&self) -> Vec<ListenerId> {
        self.inner.state.lock().queue.global_ids()
    }

    /// Listeners queued for a client that does not exist yet.
    pub fn pending_listener_ids(&self, client_id: &str) -> Vec<ListenerId> {
        self.inner.state.lock().queue.pending_for(client_id)
    }

    /// Client ids that have listeners queued for them.
    pub fn pending_client_ids(&self) -> Vec<ClientId> {
        self.inner.state.lock().queue.pending_client_ids()
    }

    /// Listeners tracked for teardown on a live client.
    pub fn tracked_listener_ids(&self, client_id: &str) -> Option<Vec<ListenerId>> {
        self.inner.state.lock().tracker.listener_ids(client_id)
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl Drop for ClientManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
