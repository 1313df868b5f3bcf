//! Transport handle abstraction.
//!
//! The hub never touches sockets directly. Each registered connection is
//! represented by a [`Link`]: a non-blocking handle that enqueues frames for
//! a writer owned by the transport layer. Sending must not perform network
//! I/O, since the hub sends while holding its lock.

use crate::message::Outbound;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link has been closed.
    #[error("Link closed")]
    Closed,

    /// The frame could not be enqueued.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// A handle to one client transport.
pub trait Link: Send + Sync {
    /// Enqueue a frame for delivery. Must not block.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or the frame cannot be queued.
    fn send(&self, frame: Outbound) -> Result<(), LinkError>;

    /// Check if the transport is still open.
    fn is_open(&self) -> bool;

    /// Close the transport. Closing an already closed link does nothing.
    fn close(&self);
}

/// An in-memory [`Link`] that records every frame it is given.
///
/// Used by tests and benchmarks in place of a real socket.
#[derive(Debug)]
pub struct RecordingLink {
    frames: Mutex<Vec<Outbound>>,
    open: AtomicBool,
    failing: AtomicBool,
}

impl RecordingLink {
    /// Create an open link.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent send fail while the link stays open.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Mark the link closed without recording a close frame, as if the peer
    /// went away.
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Get all recorded frames.
    #[must_use]
    pub fn frames(&self) -> Vec<Outbound> {
        self.lock().clone()
    }

    /// Get recorded text frames parsed as JSON.
    #[must_use]
    pub fn messages(&self) -> Vec<Value> {
        self.lock()
            .iter()
            .filter_map(Outbound::as_text)
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Get the number of liveness probes received.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|frame| matches!(frame, Outbound::Ping))
            .count()
    }

    /// Check if a close frame was recorded.
    #[must_use]
    pub fn was_closed(&self) -> bool {
        self.lock().iter().any(|frame| matches!(frame, Outbound::Close))
    }

    /// Discard recorded frames.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Outbound>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecordingLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for RecordingLink {
    fn send(&self, frame: Outbound) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LinkError::SendFailed("recording link set to fail".into()));
        }
        self.lock().push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.lock().push(Outbound::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_link_records() {
        let link = RecordingLink::new();
        link.send(Outbound::Text("{\"a\":1}".into())).unwrap();
        link.send(Outbound::Ping).unwrap();

        assert_eq!(link.frames().len(), 2);
        assert_eq!(link.messages().len(), 1);
        assert_eq!(link.ping_count(), 1);
    }

    #[test]
    fn test_recording_link_close() {
        let link = RecordingLink::new();
        link.close();
        link.close();

        assert!(!link.is_open());
        assert_eq!(link.frames(), vec![Outbound::Close]);
        assert!(matches!(link.send(Outbound::Ping), Err(LinkError::Closed)));
    }

    #[test]
    fn test_recording_link_failing() {
        let link = RecordingLink::new();
        link.set_failing(true);
        assert!(matches!(
            link.send(Outbound::Ping),
            Err(LinkError::SendFailed(_))
        ));
        assert!(link.is_open());
    }
}
