//! # matchcast-transport
//!
//! WebSocket transport for the Matchcast realtime layer.
//!
//! The hub only ever sees a [`WsLink`]: a cheap, non-blocking handle that
//! queues frames on a bounded queue for a writer task. The writer task owns the socket's sink
//! half and turns queued frames into WebSocket messages; the session loop
//! owns the stream half and dispatches inbound messages to the hub.
//!
//! ```rust,ignore
//! use matchcast_transport::{run_session, SessionConfig};
//!
//! async fn on_upgrade(socket: WebSocket, hub: Arc<Hub>) {
//!     let (sink, stream) = socket.split();
//!     run_session(hub, sink, stream, SessionConfig::default(), Arc::new(())).await;
//! }
//! ```

pub mod error;
pub mod link;
pub mod websocket;

pub use error::TransportError;
pub use link::{CloseSignal, LinkReceiver, WsLink, DEFAULT_SEND_QUEUE_CAPACITY};
pub use websocket::{
    run_session, write_loop, CloseReason, SessionConfig, SessionObserver, SessionSummary,
};
