//! In-process fake transport for tests and in-process wiring
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the [`FakeTransport`] into the code under test; from the test
//! side use the handle to:
//!
//! - read what the client sent: `handle.outbound_rx.recv().await`
//! - inject server messages: `handle.inbound_tx.send(json_string)`
//!
//! Dropping the handle's `inbound_tx` ends the client's receive stream, the
//! same way a peer hanging up does.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx ----------------->   inbound_rx  (client receive())
//! ```
//!
//! # Example
//!
//! ```
//! use toolwire::mcp::transport::fake::FakeTransport;
//! use toolwire::mcp::transport::Transport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//!
//! transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()).await.unwrap();
//! let sent = handle.outbound_rx.recv().await.unwrap();
//! assert!(sent.contains("ping"));
//!
//! handle.inbound_tx.send(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string()).unwrap();
//! use futures::StreamExt;
//! let received = transport.receive().next().await.unwrap();
//! assert!(received.contains("result"));
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, ToolwireError};
use crate::mcp::transport::{channel_stream, Transport};

/// In-process transport backed by unbounded channels.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Weak so only the handle keeps the inbound side open.
    inbound_inject_tx: mpsc::WeakUnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            inbound_inject_tx: inbound_tx.downgrade(),
            closed: Arc::clone(&closed),
        };

        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closed,
        };

        (transport, handle)
    }

    /// Push a JSON value onto the inbound stream.
    ///
    /// Returns `false` if the handle has already dropped its sender.
    pub fn inject_response(&self, response: serde_json::Value) -> bool {
        match self.inbound_inject_tx.upgrade() {
            Some(tx) => tx.send(response.to_string()).is_ok(),
            None => false,
        }
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Feeds the client's [`Transport::receive`] stream.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl FakeTransportHandle {
    /// Whether [`Transport::close`] has been called on the paired transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the transport was closed or
    /// the handle's `outbound_rx` was dropped.
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolwireError::Connection("fake transport is closed".into()));
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| ToolwireError::Connection("fake transport outbound closed".into()))
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.inbound_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::pending())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound_rx.lock().await.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_inject_response_reaches_receive() {
        let (transport, _handle) = FakeTransport::new();
        assert!(transport.inject_response(json!({"jsonrpc": "2.0", "id": 3, "result": 1})));
        let got = transport.receive().next().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&got).unwrap();
        assert_eq!(v["id"], 3);
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_receive_stream() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);
        assert!(transport.receive().next().await.is_none());
        assert!(!transport.inject_response(json!({})));
    }

    #[tokio::test]
    async fn test_close_rejects_send_and_is_visible_to_handle() {
        let (transport, handle) = FakeTransport::new();
        transport.close().await.unwrap();
        assert!(handle.is_closed());
        assert!(transport.send("{}".into()).await.is_err());
    }
}
