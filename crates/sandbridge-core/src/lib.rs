//! # Sandbridge Core
//!
//! Client-channel lifecycle and listener registry for sandboxed clients.
//!
//! ## Components
//!
//! - [`MessageChannel`] - Subscribe/send/receive over one client transport
//! - [`ClientRegistry`] - Client id to [`Client`] ownership
//! - [`ListenerQueue`] - Listeners waiting for a client (or for all clients)
//! - [`UnsubscribeTracker`] - Per-client record of attached listeners
//! - [`ClientManager`] - The lifecycle controller tying them together
//!
//! ## Example
//!
//! ```no_run
//! use sandbridge_core::{ClientManager, MpscTransport};
//!
//! let manager = ClientManager::default();
//! // Attach before the client exists; flushed on registration.
//! let sub = manager.add_listener(|msg| println!("{:?}", msg), Some("preview"));
//!
//! let (transport, _outbound) = MpscTransport::pair();
//! manager.register_client("preview", transport).unwrap();
//! manager.run();
//!
//! sub.unsubscribe();
//! ```

pub mod channel;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod subscription;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod testing;

pub use channel::{ChannelOptions, ListenerCallback, MessageChannel};
pub use manager::{ClientManager, ManagerStatus, RunReport};
pub use queue::{Enqueued, ListenerQueue};
pub use registry::{Client, ClientRegistry};
pub use subscription::{Subscription, SubscriptionScope};
pub use tracker::UnsubscribeTracker;
pub use transport::{MpscTransport, spawn_inbound};
