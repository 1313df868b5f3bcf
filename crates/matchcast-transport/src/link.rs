//! WebSocket link handle.

use matchcast_core::{Link, LinkError, Outbound};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// Default number of frames a link buffers for a slow client.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1024;

/// A [`Link`] backed by a bounded queue drained by a writer task.
///
/// Sending never blocks and never touches the network, so the hub can call it
/// while holding its lock. When the queue is full the frame is dropped and
/// the send reported as failed.
#[derive(Debug, Clone)]
pub struct WsLink {
    tx: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    closed: Arc<Notify>,
}

/// The writer side of a [`WsLink`].
#[derive(Debug)]
pub struct LinkReceiver {
    rx: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
}

/// Resolves once the hub closes the link.
///
/// Lets the session stop waiting on a socket that will never make progress,
/// such as one whose writer is stuck behind a stalled peer.
#[derive(Debug, Clone)]
pub struct CloseSignal(Arc<Notify>);

impl WsLink {
    /// Create a link with the given queue capacity and the receiver its
    /// writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, LinkReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let open = Arc::new(AtomicBool::new(true));
        (
            Self {
                tx,
                open: open.clone(),
                closed: Arc::new(Notify::new()),
            },
            LinkReceiver { rx, open },
        )
    }

    /// Get a signal that fires when this link is closed.
    #[must_use]
    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal(self.closed.clone())
    }
}

impl Link for WsLink {
    fn send(&self, frame: Outbound) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => LinkError::SendFailed("send queue full".into()),
            TrySendError::Closed(_) => {
                self.open.store(false, Ordering::SeqCst);
                LinkError::Closed
            }
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            // Best effort: a full queue or a gone writer skips the close frame
            let _ = self.tx.try_send(Outbound::Close);
            self.closed.notify_one();
        }
    }
}

impl LinkReceiver {
    /// Wait for the next queued frame.
    ///
    /// Returns `None` once every link handle has been dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Mark the link closed without queuing a close frame, after the socket
    /// itself has failed or finished.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Check if the link is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl CloseSignal {
    /// Wait until the link is closed. Returns immediately if it already was.
    pub async fn wait(&self) {
        self.0.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_link_queues_in_order() {
        let (link, mut rx) = WsLink::channel(8);
        link.send(Outbound::Text("{}".into())).unwrap();
        link.send(Outbound::Ping).unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Text("{}".into())));
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
    }

    #[tokio::test]
    async fn test_close_queues_one_close_frame() {
        let (link, mut rx) = WsLink::channel(8);
        link.close();
        link.close();

        assert!(!link.is_open());
        assert!(!rx.is_open());
        assert!(matches!(link.send(Outbound::Ping), Err(LinkError::Closed)));

        drop(link);
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_full_queue_drops_frames() {
        let (link, _rx) = WsLink::channel(4);
        let frame = Outbound::Text("x".repeat(1024).into());

        let mut failed = 0;
        for _ in 0..1_000 {
            match link.send(frame.clone()) {
                Ok(()) => {}
                Err(LinkError::SendFailed(_)) => failed += 1,
                Err(e) => panic!("Unexpected error: {}", e),
            }
        }

        assert_eq!(failed, 996);
        // A slow reader is not a dead one
        assert!(link.is_open());
    }

    #[tokio::test]
    async fn test_full_queue_recovers_after_drain() {
        let (link, mut rx) = WsLink::channel(1);
        link.send(Outbound::Ping).unwrap();
        assert!(link.send(Outbound::Ping).is_err());

        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        link.send(Outbound::Ping).unwrap();
    }

    #[tokio::test]
    async fn test_close_signal_fires_with_full_queue() {
        let (link, _rx) = WsLink::channel(1);
        let signal = link.close_signal();
        link.send(Outbound::Ping).unwrap();

        link.close();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_send_after_writer_gone() {
        let (link, rx) = WsLink::channel(8);
        drop(rx);

        assert!(matches!(link.send(Outbound::Ping), Err(LinkError::Closed)));
        assert!(!link.is_open());
    }

    #[test]
    fn test_mark_closed_is_seen_by_link() {
        let (link, rx) = WsLink::channel(8);
        rx.mark_closed();
        assert!(!link.is_open());
    }
}
