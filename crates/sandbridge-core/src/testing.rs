//! Test doubles shared by the unit test suites.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use sandbridge_protocols::{ChannelError, HostMessage, Transport};

/// Transport that records every posted message.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    posted: Mutex<Vec<HostMessage>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn posted(&self) -> Vec<HostMessage> {
        self.posted.lock().clone()
    }

    pub(crate) fn posted_kinds(&self) -> Vec<&'static str> {
        self.posted.lock().iter().map(HostMessage::kind).collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_posts(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn post(&self, message: &HostMessage) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("transport unavailable".to_string()));
        }
        self.posted.lock().push(message.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
