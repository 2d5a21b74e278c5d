//! Request/response HTTP transport (streamable HTTP, revision `2025-11-25`)
//!
//! Every outbound JSON-RPC message is sent as its own HTTP POST carrying its
//! own id. The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE body carrying one or more JSON-RPC
//!   messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! Replies are pushed onto the inbound stream and matched to their requests
//! by id in the client, so POSTs may complete in any order.
//!
//! # Session management
//!
//! The server MAY return an `MCP-Session-Id` header on the `initialize`
//! response. It is stored and replayed on every later request. A `404`
//! while a session is active clears it and returns
//! [`ToolwireError::SessionExpired`]. [`Transport::close`] ends the session
//! with an HTTP DELETE.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Result, ToolwireError};
use crate::mcp::transport::{channel_stream, connect_error, sse, Transport};
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "MCP-Session-Id";

/// Header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Request/response HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use toolwire::mcp::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    /// MCP endpoint URL (POST target).
    endpoint: url::Url,
    /// Active session ID, populated from the `initialize` response.
    session_id: Arc<RwLock<Option<String>>>,
    protocol_version: String,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    response_tx: mpsc::UnboundedSender<String>,
    response_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Last SSE event ID, replayed as `Last-Event-ID`.
    last_event_id: Arc<RwLock<Option<String>>>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens
    /// here.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The MCP server URL (e.g. `http://host/mcp`).
    /// * `headers` - Extra headers added to every request.
    /// * `timeout` - Per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the HTTP client cannot be
    /// built (TLS backend initialisation failure).
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| connect_error("http", &endpoint, e))?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            headers,
            response_tx,
            response_rx: Arc::new(tokio::sync::Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(tokio::sync::Mutex::new(error_rx)),
            last_event_id: Arc::new(RwLock::new(None)),
            closed: AtomicBool::new(false),
        })
    }

    /// The session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn apply_common_headers(
        &self,
        mut req: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        if let Some(id) = self.last_event_id.read().await.as_deref() {
            req = req.header("Last-Event-ID", id);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// Open a long-lived SSE GET stream to receive unsolicited server
    /// notifications. Returns once the stream is established; events are
    /// forwarded from a background task.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the GET request fails or the
    /// server refuses it.
    pub async fn open_get_stream(&self) -> Result<()> {
        let req = self
            .http_client
            .get(self.endpoint.as_str())
            .header("Accept", "text/event-stream");
        let req = self.apply_common_headers(req).await;

        let response = req
            .send()
            .await
            .map_err(|e| ToolwireError::Connection(format!("GET stream request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolwireError::Connection(format!(
                "GET stream returned HTTP {}",
                status
            )));
        }

        let byte_stream = response.bytes_stream();
        let response_tx = self.response_tx.clone();
        let last_event_id = Arc::clone(&self.last_event_id);
        tokio::spawn(sse::forward_messages(byte_stream, response_tx, last_event_id));
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// POST one JSON-RPC message to the endpoint.
    ///
    /// Status handling:
    ///
    /// - `202 Accepted`: notification ACK, nothing is pushed inbound.
    /// - `401 Unauthorized`: [`ToolwireError::Authentication`] carrying the
    ///   `WWW-Authenticate` value.
    /// - `404` with an active session: session cleared,
    ///   [`ToolwireError::SessionExpired`].
    /// - any other non-success: [`ToolwireError::Connection`].
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolwireError::Connection("http transport is closed".into()));
        }

        let req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header(PROTOCOL_VERSION_HEADER, &self.protocol_version)
            .body(message);
        let req = self.apply_common_headers(req).await;

        let response = req
            .send()
            .await
            .map_err(|e| ToolwireError::Connection(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_auth = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let _ = self.error_tx.send(format!("HTTP 401: {}", www_auth));
            return Err(ToolwireError::Authentication(www_auth));
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if sid.take().is_some() {
                return Err(ToolwireError::SessionExpired("mcp session expired".into()));
            }
            return Err(ToolwireError::Connection("HTTP 404 Not Found".into()));
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            let _ = self.error_tx.send(format!("HTTP POST returned {}", status));
            return Err(ToolwireError::Connection(format!(
                "HTTP POST returned status {}",
                status
            )));
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!(session_id = %new_session_id, "mcp http session established");
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            let last_event_id = Arc::clone(&self.last_event_id);
            tokio::spawn(sse::forward_messages(byte_stream, response_tx, last_event_id));
        } else {
            let body = response.text().await.map_err(|e| {
                ToolwireError::Connection(format!("failed to read response body: {}", e))
            })?;
            if !body.trim().is_empty() {
                let _ = self.response_tx.send(body);
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.response_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.error_rx))
    }

    /// Terminate the server session with a DELETE, if one is active.
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(sid) = self.session_id.write().await.take() else {
            return Ok(());
        };
        let mut req = self
            .http_client
            .delete(self.endpoint.as_str())
            .header(SESSION_HEADER, sid.as_str());
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Err(e) = req.send().await {
            tracing::debug!(error = %e, "mcp session DELETE failed");
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    /// Best-effort session termination when the transport was never closed.
    ///
    /// The DELETE runs on its own thread with a blocking client so it never
    /// blocks the async runtime.
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let session_id = match self.session_id.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };

        if let Some(sid) = session_id {
            let endpoint = self.endpoint.as_str().to_string();
            let mut extra_headers = self.headers.clone();
            extra_headers.insert(SESSION_HEADER.to_string(), sid);

            let _ = std::thread::spawn(move || {
                if let Ok(client) = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                {
                    let mut req = client.delete(&endpoint);
                    for (k, v) in &extra_headers {
                        req = req.header(k.as_str(), v.as_str());
                    }
                    let _ = req.send();
                }
            });
        }
    }
}
