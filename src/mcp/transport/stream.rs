//! Server-push stream transport (SSE with a POST back-channel)
//!
//! The client opens a long-lived GET on the SSE URL. The server's first
//! `endpoint` event names the URL (relative or absolute) that client
//! messages must be POSTed to. Every later `message` event carries one
//! JSON-RPC message: a response, a notification, or a server request. The
//! client tells them apart by the presence of `id` and `method`, so this
//! transport only forwards data.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, ToolwireError};
use crate::mcp::transport::{channel_stream, connect_error, sse, Transport};

/// SSE event type that announces the POST endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Server-push stream transport.
#[derive(Debug)]
pub struct StreamTransport {
    http_client: reqwest::Client,
    /// Where client messages are POSTed, from the `endpoint` event.
    post_url: Url,
    headers: HashMap<String, String>,
    /// Weak so the inbound stream ends when the SSE reader exits.
    inbound_tx: mpsc::WeakUnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    shutdown: CancellationToken,
}

impl StreamTransport {
    /// Open the SSE stream at `url` and wait for the `endpoint` event.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the GET fails, the server
    /// responds with a non-success status, the stream ends before an
    /// `endpoint` event, or none arrives within `connect_timeout`.
    pub async fn connect(
        url: Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| connect_error("stream", &url, e))?;

        let mut req = http_client
            .get(url.as_str())
            .header("Accept", "text/event-stream");
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = tokio::time::timeout(connect_timeout, req.send())
            .await
            .map_err(|_| connect_error("stream", &url, "GET timed out"))?
            .map_err(|e| connect_error("stream", &url, e))?;
        if !response.status().is_success() {
            return Err(connect_error(
                "stream",
                &url,
                format!("GET returned HTTP {}", response.status()),
            ));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let shutdown = CancellationToken::new();

        let events = sse::sse_events(response.bytes_stream());
        let weak_inbound = inbound_tx.downgrade();
        let reader_tx = inbound_tx;
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::pin!(events);
            let mut endpoint_tx = Some(endpoint_tx);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = reader_shutdown.cancelled() => break,
                    event = events.next() => event,
                };
                let Some(event) = event else { break };
                if event.event.as_deref() == Some(ENDPOINT_EVENT) {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data);
                    }
                    continue;
                }
                if event.is_message() && reader_tx.send(event.data).is_err() {
                    break;
                }
            }
            tracing::debug!("server-push stream ended");
        });

        let endpoint = tokio::time::timeout(connect_timeout, endpoint_rx)
            .await
            .map_err(|_| {
                shutdown.cancel();
                connect_error(
                    "stream",
                    &url,
                    format!(
                        "no `{ENDPOINT_EVENT}` event within {} ms",
                        connect_timeout.as_millis()
                    ),
                )
            })?
            .map_err(|_| {
                let cause = format!("stream ended before `{ENDPOINT_EVENT}` event");
                connect_error("stream", &url, cause)
            })?;

        let post_url = url.join(endpoint.trim()).map_err(|e| {
            shutdown.cancel();
            connect_error("stream", &url, format!("bad endpoint `{endpoint}`: {e}"))
        })?;
        tracing::debug!(sse = %url, post = %post_url, "server-push stream established");

        Ok(Self {
            http_client,
            post_url,
            headers,
            inbound_tx: weak_inbound,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            shutdown,
        })
    }

    /// URL client messages are POSTed to.
    pub fn post_url(&self) -> &Url {
        &self.post_url
    }
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    /// POST one message to the announced endpoint. Replies arrive on the
    /// stream; a JSON body on the POST itself is forwarded too.
    async fn send(&self, message: String) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ToolwireError::Connection("stream transport is closed".into()));
        }
        let mut req = self
            .http_client
            .post(self.post_url.as_str())
            .header("Content-Type", "application/json")
            .body(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let response = req
            .send()
            .await
            .map_err(|e| ToolwireError::Connection(format!("stream POST failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ToolwireError::Authentication(format!(
                "stream POST to {} rejected",
                self.post_url
            )));
        }
        if !status.is_success() {
            let _ = self.error_tx.send(format!("stream POST returned {}", status));
            return Err(ToolwireError::Connection(format!(
                "stream POST returned status {}",
                status
            )));
        }

        let is_json = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        if is_json {
            let body = response.text().await.unwrap_or_default();
            if let (false, Some(tx)) = (body.trim().is_empty(), self.inbound_tx.upgrade()) {
                let _ = tx.send(body);
            }
        }
        Ok(())
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

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
