//! # Sandbridge Protocols
//!
//! Protocol definitions shared by the Sandbridge crates.
//! Contains only types and interface definitions - no implementations.
//!
//! ## Contents
//!
//! - [`HostMessage`] / [`SandboxMessage`] - Messages exchanged with a sandbox client
//! - [`Transport`] - The endpoint a client channel posts outbound messages to
//! - [`ClientId`], [`ListenerId`], [`SubscriptionId`] - Identifiers
//! - [`ChannelError`] / [`ClientError`] - Error types

pub mod error;
pub mod message;
pub mod transport;
pub mod types;

pub use error::{ChannelError, ClientError};
pub use message::{CompileRequest, HostMessage, SandboxMessage, SandboxSetup};
pub use transport::Transport;
pub use types::*;
