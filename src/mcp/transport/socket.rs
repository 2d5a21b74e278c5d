//! Full-duplex WebSocket transport
//!
//! One JSON-RPC message per text frame in each direction. Both peers may
//! send at any time and responses may arrive in any order; correlation is
//! left to the client's id-keyed pending map.
//!
//! A writer task drains an mpsc channel into the socket sink and a reader
//! task pushes text frames onto the inbound channel. The inbound stream ends
//! when the peer sends a close frame or the socket errors.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, ToolwireError};
use crate::mcp::transport::{channel_stream, connect_error, Transport};

/// WebSocket transport.
#[derive(Debug)]
pub struct SocketTransport {
    url: Url,
    outbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    shutdown: CancellationToken,
}

impl SocketTransport {
    /// Perform the WebSocket upgrade against `url` and start the I/O tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if a header is invalid, the
    /// upgrade fails, or it does not complete within `connect_timeout`.
    pub async fn connect(
        url: Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error("socket", &url, e))?;
        for (k, v) in &headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| connect_error("socket", &url, format!("header `{k}`: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| connect_error("socket", &url, format!("header `{k}`: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _response) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    connect_error(
                        "socket",
                        &url,
                        format!("upgrade timed out after {} ms", connect_timeout.as_millis()),
                    )
                })?
                .map_err(|e| connect_error("socket", &url, e))?;

        tracing::debug!(url = %url, "websocket connected");

        let (mut sink, mut source) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (error_tx, error_rx) = mpsc::unbounded_channel::<String>();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        let writer_errors = error_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = sink.send(msg).await {
                            let _ = writer_errors.send(format!("websocket write failed: {e}"));
                            break;
                        }
                    }
                }
            }
        });

        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = reader_shutdown.cancelled() => break,
                    frame = source.next() => frame,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            let _ = error_tx.send("dropping non-UTF-8 binary frame".into());
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = error_tx.send(format!("websocket read failed: {e}"));
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Self {
            url,
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            error_rx: Arc::new(Mutex::new(error_rx)),
            shutdown,
        })
    }
}

#[async_trait::async_trait]
impl Transport for SocketTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ToolwireError::Connection(format!(
                "websocket to {} is closed",
                self.url
            )));
        }
        self.outbound_tx
            .send(Message::Text(message))
            .map_err(|_| ToolwireError::Connection(format!("websocket to {} is closed", self.url)))
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.inbound_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.error_rx))
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
