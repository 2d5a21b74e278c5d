//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every transport variant
//! satisfies. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`http::HttpTransport`] -- request/response HTTP: every message is a
//!   standalone POST; replies arrive as JSON or SSE bodies.
//! - [`socket::SocketTransport`] -- full-duplex WebSocket; one text frame per
//!   message, in either direction, in any order.
//! - [`stream::StreamTransport`] -- server-push SSE stream for inbound
//!   messages with a POST back-channel announced by an `endpoint` event.
//! - [`fake::FakeTransport`] -- in-process fake used in tests.
//!
//! # Design
//!
//! Callers `send` a serialized JSON-RPC string and `receive` a stream of
//! serialized JSON-RPC strings (one per logical message). Framing, session
//! headers, and connection management are the responsibility of each
//! implementation; request/response correlation is not. It lives in
//! [`crate::mcp::client::JsonRpcClient`] so all four variants share it.
//!
//! The `receive_err` stream carries transport-level diagnostics (e.g. stderr
//! output from a child process). Diagnostic output is never an error
//! condition.
//!
//! Use [`open`] to build a transport from a [`TransportConfig`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ToolwireError};

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The string MUST be a single, complete JSON object. The transport adds
    /// whatever framing its medium needs (a newline for stdio, an HTTP POST,
    /// a WebSocket text frame).
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the underlying channel is
    /// gone, or a more specific error when the medium reports one (e.g.
    /// [`ToolwireError::Authentication`] for HTTP 401).
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the remote peer
    /// disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// For stdio transports this carries the child's stderr. Other variants
    /// may never yield anything.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the underlying resource: kill the child, end the HTTP
    /// session, or close the socket. Calling it twice is harmless.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build a receive stream over a shared unbounded receiver.
///
/// Every transport keeps its inbound channel behind `Arc<Mutex<..>>` so the
/// stream can be created from `&self`.
pub(crate) fn channel_stream(
    rx: Arc<tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        let item = guard.recv().await?;
        drop(guard);
        Some((item, rx))
    }))
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Connection parameters for one transport variant.
///
/// Deserialized from the `transport:` key of a configured server.
///
/// # Examples
///
/// ```
/// use toolwire::mcp::transport::TransportConfig;
///
/// let cfg: TransportConfig = serde_yaml::from_str(
///     "type: stdio\ncommand: my-server\nargs: [\"--quiet\"]\n",
/// )
/// .unwrap();
/// assert_eq!(cfg.kind(), "stdio");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a child process and speak newline-delimited JSON over its pipes.
    Stdio {
        /// Executable to spawn.
        command: PathBuf,
        /// Command-line arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Environment for the child. The parent environment is not
        /// inherited apart from `PATH`.
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory for the child.
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
    /// Request/response HTTP POST endpoint.
    Http {
        /// Endpoint URL.
        url: Url,
        /// Extra headers on every request (credentials go here).
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Per-request timeout in milliseconds.
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
    /// Full-duplex WebSocket.
    Socket {
        /// `ws://` or `wss://` URL.
        url: Url,
        /// Extra headers on the upgrade request.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Server-push SSE stream with a POST back-channel.
    Stream {
        /// SSE endpoint URL.
        url: Url,
        /// Extra headers on the GET and every POST.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Short name of the variant, as used in config files and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Http { .. } => "http",
            TransportConfig::Socket { .. } => "socket",
            TransportConfig::Stream { .. } => "stream",
        }
    }
}

/// Establish a transport from `config`.
///
/// `connect_timeout` bounds the establishment step for variants that have
/// one (the WebSocket upgrade, and waiting for the stream's `endpoint`
/// event). Every variant reports establishment failures as
/// [`ToolwireError::Connection`].
///
/// # Errors
///
/// Returns [`ToolwireError::Connection`] if the process cannot be spawned or
/// the remote endpoint cannot be reached in time.
pub async fn open(
    config: &TransportConfig,
    connect_timeout: Duration,
) -> Result<Arc<dyn Transport>> {
    tracing::debug!(transport = config.kind(), "opening transport");
    let transport: Arc<dyn Transport> = match config {
        TransportConfig::Stdio {
            command,
            args,
            env,
            working_dir,
        } => Arc::new(stdio::StdioTransport::spawn(
            command.clone(),
            args.clone(),
            env.clone(),
            working_dir.clone(),
        )?),
        TransportConfig::Http {
            url,
            headers,
            timeout_ms,
        } => Arc::new(http::HttpTransport::new(
            url.clone(),
            headers.clone(),
            Duration::from_millis(*timeout_ms),
        )?),
        TransportConfig::Socket { url, headers } => Arc::new(
            socket::SocketTransport::connect(url.clone(), headers.clone(), connect_timeout).await?,
        ),
        TransportConfig::Stream { url, headers } => Arc::new(
            stream::StreamTransport::connect(url.clone(), headers.clone(), connect_timeout).await?,
        ),
    };
    Ok(transport)
}

/// Uniform establishment error.
pub(crate) fn connect_error(
    kind: &str,
    target: impl std::fmt::Display,
    cause: impl std::fmt::Display,
) -> ToolwireError {
    ToolwireError::Connection(format!("{kind} transport to {target} failed: {cause}"))
}

pub mod http;
pub mod socket;
pub mod sse;
pub mod stdio;
pub mod stream;

pub mod fake;
