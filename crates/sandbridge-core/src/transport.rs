//! Tokio-backed transport adapters.
//!
//! [`MpscTransport`] posts outbound messages into an unbounded mpsc channel
//! that a sandbox driver reads from. [`spawn_inbound`] pumps the sandbox's
//! replies into a client's channel on a tokio task, so delivery is
//! asynchronous relative to the sender.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use sandbridge_protocols::{ChannelError, HostMessage, SandboxMessage, Transport};

use crate::registry::Client;

/// Transport over a tokio unbounded sender.
pub struct MpscTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<HostMessage>>>,
}

impl MpscTransport {
    pub fn new(sender: mpsc::UnboundedSender<HostMessage>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Create a transport and the receiver a sandbox driver reads from.
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

impl Transport for MpscTransport {
    fn post(&self, message: &HostMessage) -> Result<(), ChannelError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(ChannelError::Closed)?;
        sender
            .send(message.clone())
            .map_err(|_| ChannelError::SendFailed("sandbox receiver dropped".to_string()))
    }

    /// Drops the sender so the driver's receiver ends.
    fn close(&self) {
        self.sender.lock().take();
    }
}

/// Deliver messages from `receiver` to `client`'s listeners until the
/// receiver ends or the channel is closed.
pub fn spawn_inbound(
    client: Arc<Client>,
    mut receiver: mpsc::UnboundedReceiver<SandboxMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if client.channel().is_closed() {
                break;
            }
            client.channel().deliver(&message);
        }
        debug!(client_id = client.id(), "Inbound pump stopped");
    })
}
