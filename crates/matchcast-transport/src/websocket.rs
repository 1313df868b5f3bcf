//! WebSocket session handling.
//!
//! A session registers a [`WsLink`] with the hub, greets the client, and then
//! runs two halves until either side ends:
//!
//! - the writer task drains the link's queue into the socket sink;
//! - the session loop reads the socket stream and dispatches to the hub.
//!
//! If the hub closes the link (eviction or shutdown) the session stops
//! reading at once, even when the writer is stuck behind a stalled peer.
//! However the session ends, the connection is unregistered exactly once.

use crate::error::TransportError;
use crate::link::{LinkReceiver, WsLink, DEFAULT_SEND_QUEUE_CAPACITY};
use axum::extract::ws::Message;
use futures_util::{pin_mut, Sink, SinkExt, Stream, StreamExt};
use matchcast_core::{DispatchOutcome, Hub, Link, Outbound, DEFAULT_HEARTBEAT_INTERVAL};
use matchcast_protocol::EventEnvelope;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long the writer gets to flush the close frame once the session ends.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heartbeat interval announced in the greeting.
    pub heartbeat_interval_ms: u64,
    /// Frames buffered for a slow client before further sends are dropped.
    pub send_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// The hub closed the link (eviction or shutdown).
    ServerClosed,
    /// Reading or writing the socket failed.
    TransportFailed,
}

/// What happened during a session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// The connection's hub ID.
    pub connection_id: String,
    /// Inbound application messages handled.
    pub handled: usize,
    /// Inbound messages that were malformed, unrecognized or rejected.
    pub errors: usize,
    /// Why the session ended.
    pub reason: CloseReason,
}

/// Hooks for observing traffic on a session, such as recording metrics.
///
/// Inbound calls come from the session loop; outbound calls come from the
/// writer task.
pub trait SessionObserver: Send + Sync + 'static {
    /// An inbound application message of `bytes` was dispatched.
    fn inbound(&self, _bytes: usize, _outcome: &DispatchOutcome, _elapsed: Duration) {}

    /// A text frame of `bytes` was written to the socket.
    fn outbound(&self, _bytes: usize) {}
}

impl SessionObserver for () {}

/// Drain a link's queue into a WebSocket sink.
///
/// Returns once a close frame has been written or every link handle has been
/// dropped.
///
/// # Errors
///
/// Returns an error if writing to the sink fails. The link is marked closed
/// either way.
pub async fn write_loop<W, O>(
    sink: W,
    mut rx: LinkReceiver,
    observer: Arc<O>,
) -> Result<(), TransportError>
where
    W: Sink<Message>,
    W::Error: fmt::Display,
    O: SessionObserver,
{
    pin_mut!(sink);

    while let Some(frame) = rx.recv().await {
        let (message, text_len, closing) = match frame {
            Outbound::Text(text) => (Message::Text(text.to_string()), Some(text.len()), false),
            Outbound::Ping => (Message::Ping(Vec::new()), None, false),
            Outbound::Close => (Message::Close(None), None, true),
        };

        if let Err(e) = sink.send(message).await {
            rx.mark_closed();
            return Err(TransportError::SendFailed(e.to_string()));
        }
        if let Some(bytes) = text_len {
            observer.outbound(bytes);
        }
        if closing {
            break;
        }
    }

    rx.mark_closed();
    let _ = sink.close().await;
    Ok(())
}

/// Run one client session over a split WebSocket.
///
/// `observer` sees every inbound application message with its dispatch
/// outcome and latency, and every text frame written back.
pub async fn run_session<W, R, E, O>(
    hub: Arc<Hub>,
    sink: W,
    stream: R,
    config: SessionConfig,
    observer: Arc<O>,
) -> SessionSummary
where
    W: Sink<Message> + Send + 'static,
    W::Error: fmt::Display,
    R: Stream<Item = Result<Message, E>>,
    E: fmt::Display,
    O: SessionObserver,
{
    let (link, rx) = WsLink::channel(config.send_queue_capacity);
    let close_signal = link.close_signal();
    let connection_id = hub.register(Arc::new(link.clone()));
    debug!(connection = %connection_id, "WebSocket connected");

    let greeting = EventEnvelope::connected(&connection_id, config.heartbeat_interval_ms);
    match Outbound::encode(&greeting) {
        Ok(frame) => {
            if let Err(e) = link.send(frame) {
                warn!(connection = %connection_id, error = %e, "Failed to queue greeting");
            }
        }
        Err(e) => warn!(connection = %connection_id, error = %e, "Failed to encode greeting"),
    }
    drop(link);

    let mut writer = tokio::spawn(write_loop(sink, rx, observer.clone()));
    let mut writer_done = false;
    let mut handled = 0;
    let mut errors = 0;

    pin_mut!(stream);

    let reason = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let start = Instant::now();
                    let outcome = hub.dispatch(&connection_id, &text);
                    tally(&outcome, &mut handled, &mut errors);
                    observer.inbound(text.len(), &outcome, start.elapsed());
                }
                Some(Ok(Message::Binary(data))) => {
                    let start = Instant::now();
                    let outcome = hub.dispatch_bytes(&connection_id, &data);
                    tally(&outcome, &mut handled, &mut errors);
                    observer.inbound(data.len(), &outcome, start.elapsed());
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!(connection = %connection_id, "Pong");
                    hub.mark_alive(&connection_id);
                }
                Some(Ok(Message::Ping(_))) => {
                    // Answered by the WebSocket layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %connection_id, "Received close frame");
                    break CloseReason::ClientClosed;
                }
                Some(Err(e)) => {
                    warn!(connection = %connection_id, error = %e, "WebSocket error");
                    break CloseReason::TransportFailed;
                }
                None => {
                    debug!(connection = %connection_id, "WebSocket stream ended");
                    break CloseReason::StreamEnded;
                }
            },
            () = close_signal.wait() => {
                debug!(connection = %connection_id, "Link closed by hub");
                break CloseReason::ServerClosed;
            }
            result = &mut writer => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => break CloseReason::ServerClosed,
                    Ok(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket write failed");
                        break CloseReason::TransportFailed;
                    }
                    Err(e) => {
                        let e = TransportError::Writer(e.to_string());
                        warn!(connection = %connection_id, error = %e, "Writer task ended");
                        break CloseReason::TransportFailed;
                    }
                }
            }
        }
    };

    // Queues a close frame if the link is still open
    hub.unregister(&connection_id);

    if !writer_done && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    debug!(
        connection = %connection_id,
        reason = ?reason,
        handled,
        errors,
        "WebSocket disconnected"
    );

    SessionSummary {
        connection_id,
        handled,
        errors,
        reason,
    }
}

fn tally(outcome: &DispatchOutcome, handled: &mut usize, errors: &mut usize) {
    match outcome {
        DispatchOutcome::Handled => *handled += 1,
        _ => *errors += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    type ClientTx = mpsc::UnboundedSender<Result<Message, String>>;

    /// Reports each inbound size and whether it was malformed, and counts
    /// outbound text frames.
    struct Tally {
        seen: mpsc::UnboundedSender<(usize, bool)>,
        outbound: AtomicUsize,
    }

    impl SessionObserver for Tally {
        fn inbound(&self, bytes: usize, outcome: &DispatchOutcome, _elapsed: Duration) {
            let malformed = matches!(outcome, DispatchOutcome::Malformed(_));
            let _ = self.seen.send((bytes, malformed));
        }

        fn outbound(&self, _bytes: usize) {
            self.outbound.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// An in-memory socket: what the client sends, and what the server wrote.
    fn socket() -> (
        ClientTx,
        impl Stream<Item = Result<Message, String>> + Send + 'static,
        impl Sink<Message, Error = &'static str> + Send + 'static,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (client_tx, client_rx) = mpsc::unbounded_channel::<Result<Message, String>>();
        let inbound = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let (server_tx, server_rx) = mpsc::unbounded_channel::<Message>();
        let outbound = sink::unfold(server_tx, |tx, message: Message| async move {
            match tx.send(message) {
                Ok(()) => Ok(tx),
                Err(_) => Err("peer gone"),
            }
        });

        (client_tx, inbound, outbound, server_rx)
    }

    async fn next_message(out: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        match timeout(Duration::from_secs(1), out.recv()).await {
            Ok(Some(message)) => message,
            other => panic!("Expected a message, got {:?}", other),
        }
    }

    async fn next_json(out: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match next_message(out).await {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected a text message, got {:?}", other),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_write_loop_maps_frames() {
        let (link, rx) = WsLink::channel(8);
        let (_client, _inbound, sink, mut out) = socket();

        link.send(Outbound::Text("{\"a\":1}".into())).unwrap();
        link.send(Outbound::Ping).unwrap();
        link.close();

        write_loop(sink, rx, Arc::new(())).await.unwrap();

        assert!(matches!(next_message(&mut out).await, Message::Text(t) if t == "{\"a\":1}"));
        assert!(matches!(next_message(&mut out).await, Message::Ping(p) if p.is_empty()));
        assert!(matches!(next_message(&mut out).await, Message::Close(None)));
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_write_loop_failure_marks_closed() {
        let (link, rx) = WsLink::channel(8);
        let broken = sink::unfold((), |(), _message: Message| async move {
            Err::<(), _>("broken pipe")
        });

        link.send(Outbound::Ping).unwrap();
        let result = write_loop(broken, rx, Arc::new(())).await;

        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        assert!(!link.is_open());
    }

    #[tokio::test]
    async fn test_session_greets_and_dispatches() {
        let hub = Arc::new(Hub::new());
        let (client, inbound, sink, mut out) = socket();
        let session = tokio::spawn(run_session(
            hub.clone(),
            sink,
            inbound,
            SessionConfig {
                heartbeat_interval_ms: 5_000,
                ..Default::default()
            },
            Arc::new(()),
        ));

        let greeting = next_json(&mut out).await;
        assert_eq!(greeting["event"], "connected");
        assert_eq!(greeting["data"]["heartbeatMs"], 5_000);
        let id = greeting["data"]["clientId"].as_str().unwrap().to_string();
        assert!(hub.contains(&id));

        client
            .send(Ok(Message::Text(
                r#"{"type":"subscribe","channel":"scores"}"#.into(),
            )))
            .unwrap();
        wait_until(|| hub.subscriber_count("scores") == 1).await;

        hub.broadcast_to("scores", "update", serde_json::json!({"home": 1}))
            .unwrap();
        let update = next_json(&mut out).await;
        assert_eq!(update["event"], "update");
        assert_eq!(update["data"]["home"], 1);

        drop(client);
        let summary = session.await.unwrap();
        assert_eq!(summary.connection_id, id);
        assert_eq!(summary.handled, 1);
        assert_eq!(summary.reason, CloseReason::StreamEnded);
        assert!(!hub.contains(&id));
        assert_eq!(hub.subscriber_count("scores"), 0);
    }

    #[tokio::test]
    async fn test_session_counts_bad_messages() {
        let hub = Arc::new(Hub::new());
        let (client, inbound, sink, mut out) = socket();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let observer = Arc::new(Tally {
            seen: seen_tx,
            outbound: AtomicUsize::new(0),
        });
        let session = tokio::spawn(run_session(
            hub.clone(),
            sink,
            inbound,
            SessionConfig::default(),
            observer.clone(),
        ));
        next_json(&mut out).await;

        client.send(Ok(Message::Text("{oops".into()))).unwrap();
        client
            .send(Ok(Message::Text(r#"{"type":"teleport"}"#.into())))
            .unwrap();
        assert_eq!(seen_rx.recv().await, Some((5, true)));
        assert_eq!(seen_rx.recv().await, Some((19, false)));

        client.send(Ok(Message::Close(None))).unwrap();
        let summary = session.await.unwrap();
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.reason, CloseReason::ClientClosed);
        // The greeting is the only text frame written
        assert_eq!(observer.outbound.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_pong_marks_alive() {
        let hub = Arc::new(Hub::new());
        let (client, inbound, sink, mut out) = socket();
        let _session = tokio::spawn(run_session(
            hub.clone(),
            sink,
            inbound,
            SessionConfig::default(),
            Arc::new(()),
        ));
        let greeting = next_json(&mut out).await;
        let id = greeting["data"]["clientId"].as_str().unwrap().to_string();

        hub.heartbeat_sweep();
        assert!(matches!(next_message(&mut out).await, Message::Ping(_)));

        client.send(Ok(Message::Pong(Vec::new()))).unwrap();
        wait_until(|| hub.liveness(&id) == Some(matchcast_core::Liveness::Alive)).await;

        let report = hub.heartbeat_sweep();
        assert!(report.evicted.is_empty());
    }

    #[tokio::test]
    async fn test_session_ends_when_hub_closes_link() {
        let hub = Arc::new(Hub::new());
        let (_client, inbound, sink, mut out) = socket();
        let session = tokio::spawn(run_session(
            hub.clone(),
            sink,
            inbound,
            SessionConfig::default(),
            Arc::new(()),
        ));
        let greeting = next_json(&mut out).await;
        let id = greeting["data"]["clientId"].as_str().unwrap().to_string();

        assert!(hub.unregister(&id));
        assert!(matches!(next_message(&mut out).await, Message::Close(None)));

        let summary = timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, CloseReason::ServerClosed);
    }

    #[tokio::test]
    async fn test_session_transport_error() {
        let hub = Arc::new(Hub::new());
        let (client, inbound, sink, mut out) = socket();
        let session = tokio::spawn(run_session(
            hub.clone(),
            sink,
            inbound,
            SessionConfig::default(),
            Arc::new(()),
        ));
        next_json(&mut out).await;

        client.send(Err("connection reset".to_string())).unwrap();
        let summary = session.await.unwrap();
        assert_eq!(summary.reason, CloseReason::TransportFailed);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_eviction_ends_session_with_stalled_peer() {
        let hub = Arc::new(Hub::new());
        let (_client, inbound, _sink, _out) = socket();
        let stalled = sink::unfold((), |(), _message: Message| {
            futures_util::future::pending::<Result<(), &'static str>>()
        });
        let session = tokio::spawn(run_session(
            hub.clone(),
            stalled,
            inbound,
            SessionConfig::default(),
            Arc::new(()),
        ));
        wait_until(|| hub.connection_count() == 1).await;

        hub.heartbeat_sweep();
        let report = hub.heartbeat_sweep();
        assert_eq!(report.evicted.len(), 1);

        let summary = timeout(CLOSE_FLUSH_TIMEOUT * 3, session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.connection_id, report.evicted[0]);
        assert_eq!(summary.reason, CloseReason::ServerClosed);
        assert_eq!(hub.connection_count(), 0);
    }
}
