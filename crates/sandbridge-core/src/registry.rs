//! Client registry.
//!
//! Pure identity/ownership bookkeeping: maps a [`ClientId`] to the [`Client`]
//! that owns its [`MessageChannel`]. No listener logic lives here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use sandbridge_protocols::{ClientError, ClientId, Transport};

use crate::channel::{ChannelOptions, MessageChannel};

/// A registered sandbox client.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    channel: MessageChannel,
    registered_at: DateTime<Utc>,
}

impl Client {
    fn new(id: ClientId, transport: Arc<dyn Transport>, options: ChannelOptions) -> Self {
        Self {
            channel: MessageChannel::new(id.clone(), transport, options),
            id,
            registered_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

/// Registry of live clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    options: ChannelOptions,
}

impl ClientRegistry {
    /// Create an empty registry whose channels use `options`.
    pub fn new(options: ChannelOptions) -> Self {
        Self {
            clients: DashMap::new(),
            options,
        }
    }

    /// Create a client and its channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateClient`] if `id` is already registered.
    pub fn create(
        &self,
        id: impl Into<ClientId>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Client>, ClientError> {
        match self.clients.entry(id.into()) {
            Entry::Occupied(entry) => Err(ClientError::DuplicateClient(entry.key().clone())),
            Entry::Vacant(entry) => {
                let client = Arc::new(Client::new(
                    entry.key().clone(),
                    transport,
                    self.options.clone(),
                ));
                entry.insert(client.clone());
                Ok(client)
            }
        }
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a client. No-op if absent.
    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.remove(id).map(|(_, client)| client)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// All registered client IDs, sorted.
    pub fn list(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// All registered clients, sorted by ID.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        let mut clients: Vec<Arc<Client>> =
            self.clients.iter().map(|entry| entry.value().clone()).collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(ChannelOptions::default())
    }
}
