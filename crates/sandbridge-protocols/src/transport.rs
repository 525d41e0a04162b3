//! Transport protocol definition.
//!
//! A transport is the opaque endpoint of one sandbox client. The host only
//! ever posts messages to it; inbound messages are fed back through the
//! owning channel by whoever drives the transport.

use crate::error::ChannelError;
use crate::message::HostMessage;

/// Outbound endpoint of a sandbox client.
pub trait Transport: Send + Sync {
    /// Post a message to the sandbox. Delivery is fire-and-forget.
    fn post(&self, message: &HostMessage) -> Result<(), ChannelError>;

    /// Release the endpoint. Called once when the owning client is torn down.
    fn close(&self) {}
}
