//! Error types for the Sandbridge protocol layer.

mod channel;
mod client;

pub use channel::*;
pub use client::*;
