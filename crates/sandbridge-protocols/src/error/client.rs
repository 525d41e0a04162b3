//! Client lifecycle errors.

use thiserror::Error;

use super::ChannelError;
use crate::types::ClientId;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client already registered: {0}")]
    DuplicateClient(ClientId),

    #[error("Client not found: {0}")]
    NotFound(ClientId),

    #[error("Channel error on client {client_id}: {source}")]
    Channel {
        client_id: ClientId,
        #[source]
        source: ChannelError,
    },
}

impl ClientError {
    pub fn channel(client_id: impl Into<ClientId>, source: ChannelError) -> Self {
        ClientError::Channel {
            client_id: client_id.into(),
            source,
        }
    }
}
