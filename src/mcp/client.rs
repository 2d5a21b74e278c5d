//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] is a channel-backed JSON-RPC 2.0 client that is
//! decoupled from the underlying transport. Outbound serialized messages go
//! to an mpsc sender; inbound serialized messages are processed by
//! [`start_read_loop`]. [`connect_transport`] wires both ends to any
//! [`Transport`].
//!
//! # Design
//!
//! - In-flight requests live in a pending arena keyed by `u64` request id.
//!   Each [`PendingRequest`] records its method, issue time, deadline, and
//!   the oneshot sender that settles it.
//! - The read loop settles entries as responses arrive and runs a periodic
//!   sweep that rejects entries whose deadline passed or whose caller went
//!   away. Responses for ids that are not in the arena are dropped.
//! - Notifications fan out to every listener registered for the method and
//!   to wildcard listeners, in arrival order.
//! - Cancelling the [`CancellationToken`] (or the inbound side ending) stops
//!   the loop and rejects every pending request with
//!   [`ToolwireError::Connection`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolwireError};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
    METHOD_PING,
};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the read loop sweeps the pending arena.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Convenience alias for a boxed, `Send`-safe async future.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

type NotificationHandler = Box<dyn Fn(Value) + Send + Sync + 'static>;

type WildcardHandler = Box<dyn Fn(&str, Value) + Send + Sync + 'static>;

type ServerRequestHandler = Box<
    dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, JsonRpcError>>
        + Send
        + Sync
        + 'static,
>;

/// One in-flight request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    /// Method of the request; used to map error codes on settle.
    pub method: String,
    /// When the request was sent.
    pub issued_at: Instant,
    /// When the sweep rejects the request with a timeout.
    pub deadline: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value>) {
        // The caller may have already timed out and dropped its receiver.
        let _ = self.tx.send(outcome);
    }
}

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use toolwire::mcp::client::{JsonRpcClient, start_read_loop};
///
/// #[tokio::main]
/// async fn main() {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let token = CancellationToken::new();
///     let client = Arc::new(JsonRpcClient::new(out_tx));
///     let _handle = start_read_loop(in_rx, token, Arc::clone(&client));
/// }
/// ```
pub struct JsonRpcClient {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    notification_handlers: Mutex<HashMap<String, Vec<NotificationHandler>>>,
    wildcard_handlers: Mutex<Vec<WildcardHandler>>,
    server_request_handlers: Mutex<HashMap<String, ServerRequestHandler>>,
    default_timeout: Duration,
    sweep_interval: Duration,
    /// Cancelled once the read loop has exited.
    disconnected: CancellationToken,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("default_timeout", &self.default_timeout)
            .field("disconnected", &self.disconnected.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client that writes serialized messages to `outbound_tx`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use toolwire::mcp::client::JsonRpcClient;
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<String>();
    /// let client = JsonRpcClient::new(tx);
    /// ```
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound_tx,
            notification_handlers: Mutex::new(HashMap::new()),
            wildcard_handlers: Mutex::new(Vec::new()),
            server_request_handlers: Mutex::new(HashMap::new()),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            disconnected: CancellationToken::new(),
        }
    }

    /// Override the timeout used when [`request`](Self::request) gets `None`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override how often expired pending entries are swept.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Token that is cancelled when the read loop exits for any reason.
    pub fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Errors
    ///
    /// - [`ToolwireError::Connection`] if the outbound side is closed or the
    ///   connection is torn down while waiting.
    /// - [`ToolwireError::Timeout`] if no response arrives before the
    ///   deadline. The request is not cancelled server-side.
    /// - The mapped variant (see [`ToolwireError::from_rpc`]) if the peer
    ///   returns an error object.
    /// - [`ToolwireError::Serialization`] if the params or result do not
    ///   (de)serialize.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        if self.disconnected.is_cancelled() {
            return Err(ToolwireError::Connection("connection is closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timeout = timeout.unwrap_or(self.default_timeout);
        let message = serde_json::to_string(&JsonRpcRequest::new(
            serde_json::json!(id),
            method,
            Some(serde_json::to_value(params)?),
        ))?;

        // Register before sending so the response can never outrun the entry.
        let (tx, rx) = oneshot::channel();
        let issued_at = Instant::now();
        self.pending.lock().await.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                issued_at,
                deadline: issued_at + timeout,
                tx,
            },
        );

        if self.disconnected.is_cancelled() || self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ToolwireError::Connection("outbound channel closed".into()));
        }
        tracing::trace!(id, method, "request sent");

        let value = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => {
                return Err(ToolwireError::Connection(
                    "connection closed before response arrived".into(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ToolwireError::Timeout {
                    method: method.to_string(),
                    elapsed_ms: issued_at.elapsed().as_millis() as u64,
                });
            }
        };

        Ok(serde_json::from_value(value)?)
    }

    /// Send a JSON-RPC notification (no `id`, no response).
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the outbound channel is
    /// closed.
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcNotification::new(
            method,
            Some(serde_json::to_value(params)?),
        ))?;
        self.outbound_tx
            .send(message)
            .map_err(|_| ToolwireError::Connection("outbound channel closed".into()))
    }

    /// Add a listener for server notifications with `method`.
    ///
    /// Every listener registered for a method is called, in registration
    /// order, with the raw `params` (`Value::Null` when absent).
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .await
            .entry(method.into())
            .or_default()
            .push(Box::new(f));
    }

    /// Add a listener that sees every server notification with its method.
    pub async fn on_any_notification(&self, f: impl Fn(&str, Value) + Send + Sync + 'static) {
        self.wildcard_handlers.lock().await.push(Box::new(f));
    }

    /// Register the handler for a server-initiated request. Registering a
    /// second handler for the same method replaces the first.
    ///
    /// Without a handler the client answers `-32601`, except for `ping`,
    /// which is answered with an empty result.
    pub async fn on_server_request(
        &self,
        method: impl Into<String>,
        f: impl Fn(Value) -> BoxFuture<'static, std::result::Result<Value, JsonRpcError>>
            + Send
            + Sync
            + 'static,
    ) {
        self.server_request_handlers
            .lock()
            .await
            .insert(method.into(), Box::new(f));
    }

    /// Reject every pending request whose deadline has passed and drop
    /// entries whose caller is gone.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<(u64, PendingRequest)> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now || p.tx.is_closed())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        for (id, entry) in expired {
            tracing::debug!(id, method = %entry.method, "sweeping expired request");
            let elapsed_ms = entry.issued_at.elapsed().as_millis() as u64;
            let method = entry.method.clone();
            entry.settle(Err(ToolwireError::Timeout { method, elapsed_ms }));
        }
    }

    /// Settle the pending request `id` with an error, if it is still waiting.
    pub async fn fail_request(&self, id: u64, error: ToolwireError) {
        if let Some(entry) = self.pending.lock().await.remove(&id) {
            entry.settle(Err(error));
        }
    }

    async fn reject_all(&self, reason: &str) {
        let drained: Vec<PendingRequest> =
            self.pending.lock().await.drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), reason, "rejecting pending requests");
        }
        for entry in drained {
            entry.settle(Err(ToolwireError::Connection(reason.to_string())));
        }
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// The loop reads serialized JSON strings from `inbound_rx` and dispatches
/// each one:
///
/// - **Response** (`id` plus `result` or `error`): settles the matching
///   pending entry; unknown ids are dropped.
/// - **Server-initiated request** (`id` plus `method`): runs the registered
///   handler on a spawned task, which writes the response to the outbound
///   channel.
/// - **Notification** (`method`, no `id`): fans out to listeners.
///
/// Between messages, the pending arena is swept every sweep interval. When
/// the loop ends, all pending requests are rejected.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(client.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break "connection cancelled",

                maybe_msg = inbound_rx.recv() => match maybe_msg {
                    Some(raw) => dispatch_message(&raw, &client).await,
                    None => break "connection closed by peer",
                },

                _ = sweep.tick() => client.sweep_expired().await,
            }
        };

        client.disconnected.cancel();
        client.reject_all(reason).await;
    })
}

/// Wire `transport` to a new client and start its read loop.
///
/// Three tasks are spawned: an outbound pump (client -> transport), an
/// inbound pump (transport -> read loop), and the read loop itself. A
/// transport send failure for a request settles that request with the
/// transport's error. When the transport's receive stream ends the read
/// loop exits and the client's [`disconnected`](JsonRpcClient::disconnected)
/// token fires.
///
/// Cancelling `cancellation` stops all three tasks; it does not close the
/// transport.
pub fn connect_transport(
    transport: Arc<dyn Transport>,
    cancellation: CancellationToken,
    request_timeout: Duration,
) -> (Arc<JsonRpcClient>, tokio::task::JoinHandle<()>) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let client = Arc::new(JsonRpcClient::new(out_tx).with_default_timeout(request_timeout));

    let writer = Arc::clone(&transport);
    let writer_client = Arc::clone(&client);
    let writer_cancel = cancellation.clone();
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = writer_cancel.cancelled() => break,
                msg = out_rx.recv() => msg,
            };
            let Some(msg) = msg else { break };
            if let Err(e) = writer.send(msg.clone()).await {
                tracing::warn!(error = %e, "transport send failed");
                match request_id(&msg) {
                    Some(id) => writer_client.fail_request(id, e).await,
                    None => tracing::debug!("dropped outbound notification after send failure"),
                }
            }
        }
    });

    let reader_cancel = cancellation.clone();
    tokio::spawn(async move {
        let mut inbound = transport.receive();
        loop {
            let msg = tokio::select! {
                biased;
                _ = reader_cancel.cancelled() => break,
                msg = inbound.next() => msg,
            };
            let Some(msg) = msg else { break };
            if in_tx.send(msg).is_err() {
                break;
            }
        }
    });

    let handle = start_read_loop(in_rx, cancellation, Arc::clone(&client));
    (client, handle)
}

/// Numeric id of an outbound request, if `raw` is one.
fn request_id(raw: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value.get("method")?;
    value.get("id")?.as_u64()
}

async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("MCP read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    // Some servers batch; each element is dispatched on its own.
    if let Value::Array(items) = value {
        for item in items {
            dispatch_value(item, client).await;
        }
        return;
    }
    dispatch_value(value, client).await;
}

async fn dispatch_value(value: Value, client: &Arc<JsonRpcClient>) {
    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client).await;
    } else if has_method {
        handle_notification(value, client).await;
    } else {
        tracing::debug!(
            "MCP read loop: received unclassifiable message; ignoring. \
             has_id={has_id} has_method={has_method} has_result={has_result} has_error={has_error}"
        );
    }
}

async fn handle_response(value: Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
    {
        Some(id) => id,
        None => {
            tracing::debug!("MCP read loop: response has non-integer id {id_val}; dropping");
            return;
        }
    };

    let Some(entry) = client.pending.lock().await.remove(&id) else {
        tracing::debug!("MCP read loop: received response for unknown id {id}; dropping");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => {
            let rpc = serde_json::from_value::<JsonRpcError>(error_val.clone()).unwrap_or_else(
                |_| JsonRpcError::new(-32603, format!("malformed error object: {error_val}")),
            );
            Err(ToolwireError::from_rpc(rpc, &entry.method))
        }
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };

    tracing::trace!(id, method = %entry.method, ok = outcome.is_ok(), "request settled");
    entry.settle(outcome);
}

async fn handle_server_request(value: Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    let handler_future = {
        let handlers = client.server_request_handlers.lock().await;
        handlers.get(&method).map(|h| h(params))
    };

    // The handler runs on its own task so the read loop keeps settling
    // responses, including ones the handler itself is waiting for.
    let outbound_tx = client.outbound_tx.clone();
    tokio::spawn(async move {
        let response = match handler_future {
            Some(future) => match future.await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::failure(Some(id), error),
            },
            None if method == METHOD_PING => JsonRpcResponse::success(id, serde_json::json!({})),
            None => JsonRpcResponse::failure(
                Some(id),
                JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
            ),
        };

        if let Ok(serialized) = serde_json::to_string(&response) {
            let _ = outbound_tx.send(serialized);
        }
    });
}

async fn handle_notification(value: Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    let mut delivered = 0usize;
    {
        let handlers = client.notification_handlers.lock().await;
        if let Some(listeners) = handlers.get(&method) {
            for listener in listeners {
                listener(params.clone());
                delivered += 1;
            }
        }
    }
    {
        let wildcards = client.wildcard_handlers.lock().await;
        for listener in wildcards.iter() {
            listener(&method, params.clone());
            delivered += 1;
        }
    }

    if delivered == 0 {
        tracing::debug!("MCP read loop: no listener for notification '{method}'; ignoring");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn make_client() -> (
        Arc<JsonRpcClient>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
        CancellationToken,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let token = CancellationToken::new();
        let client = Arc::new(JsonRpcClient::new(out_tx));
        start_read_loop(in_rx, token.clone(), Arc::clone(&client));
        (client, out_rx, in_tx, token)
    }

    async fn next_request(out_rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let raw = out_rx.recv().await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_request_resolves_with_correct_result() {
        let (client, mut out_rx, in_tx, _token) = make_client();

        tokio::spawn(async move {
            let req = next_request(&mut out_rx).await;
            let response = json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "result": { "tools": [] }
            });
            in_tx.send(response.to_string()).unwrap();
        });

        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct ToolsListResult {
            tools: Vec<Value>,
        }

        let result: ToolsListResult = client
            .request("tools/list", json!({}), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.tools.is_empty());
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_responses_out_of_order_resolve_by_id() {
        let (client, mut out_rx, in_tx, _token) = make_client();

        tokio::spawn(async move {
            let first = next_request(&mut out_rx).await;
            let second = next_request(&mut out_rx).await;
            for req in [second, first] {
                let resp = json!({"jsonrpc": "2.0", "id": req["id"], "result": req["params"]});
                in_tx.send(resp.to_string()).unwrap();
            }
        });

        let (a, b) = tokio::join!(
            client.request::<_, Value>("echo", json!({"n": 1}), None),
            client.request::<_, Value>("echo", json!({"n": 2}), None),
        );
        assert_eq!(a.unwrap()["n"], 1);
        assert_eq!(b.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped_and_pending_untouched() {
        let (client, mut out_rx, in_tx, _token) = make_client();

        let in_tx_clone = in_tx.clone();
        tokio::spawn(async move {
            let req = next_request(&mut out_rx).await;
            in_tx_clone
                .send(json!({"jsonrpc": "2.0", "id": 9999, "result": "stray"}).to_string())
                .unwrap();
            in_tx_clone
                .send(json!({"jsonrpc": "2.0", "id": req["id"], "result": "mine"}).to_string())
                .unwrap();
        });

        let got: String = client
            .request("ping", json!({}), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(got, "mine");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_removes_entry() {
        let (client, _out_rx, _in_tx, _token) = make_client();

        let err = client
            .request::<_, Value>("tools/list", json!({}), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        match err {
            ToolwireError::Timeout { method, .. } => assert_eq!(method, "tools/list"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_rejects_expired_entries() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
        let client = Arc::new(JsonRpcClient::new(out_tx));

        // Caller waits longer than the entry's deadline so only the sweep
        // can settle it.
        let c = Arc::clone(&client);
        let task = tokio::spawn(async move {
            c.request::<_, Value>("slow", json!({}), Some(Duration::from_millis(100)))
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(client.pending_count().await, 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        client.sweep_expired().await;
        assert_eq!(client.pending_count().await, 0);

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, Err(ToolwireError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_error_response_is_mapped() {
        let (client, mut out_rx, in_tx, _token) = make_client();

        tokio::spawn(async move {
            let req = next_request(&mut out_rx).await;
            let response = json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {
                    "code": -32602,
                    "message": "cursor expired",
                    "data": {"reason": "invalid_cursor"}
                }
            });
            in_tx.send(response.to_string()).unwrap();
        });

        let err = client
            .request::<_, Value>("tools/list", json!({"cursor": "x"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolwireError::Pagination(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_cancel_rejects_pending_with_connection_error() {
        let (client, _out_rx, _in_tx, token) = make_client();

        let c = Arc::clone(&client);
        let request_task = tokio::spawn(async move {
            c.request::<_, Value>("tools/list", json!({}), Some(Duration::from_secs(10)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), request_task)
            .await
            .expect("request did not complete after cancel")
            .unwrap();
        assert!(matches!(outcome, Err(ToolwireError::Connection(_))));
        assert!(client.disconnected().is_cancelled());

        let after = client.request::<_, Value>("ping", json!({}), None).await;
        assert!(matches!(after, Err(ToolwireError::Connection(_))));
    }

    #[tokio::test]
    async fn test_inbound_close_rejects_pending() {
        let (client, _out_rx, in_tx, _token) = make_client();

        let c = Arc::clone(&client);
        let request_task = tokio::spawn(async move {
            c.request::<_, Value>("tools/call", json!({}), Some(Duration::from_secs(10)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(in_tx);

        let outcome = request_task.await.unwrap();
        assert!(matches!(outcome, Err(ToolwireError::Connection(_))));
    }

    #[tokio::test]
    async fn test_notification_fans_out_to_all_listeners_in_order() {
        let (client, _out_rx, in_tx, _token) = make_client();

        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let s1 = Arc::clone(&seen);
        client
            .on_notification("notifications/progress", move |p| {
                s1.lock().unwrap().push(format!("a{}", p["n"]));
            })
            .await;
        let s2 = Arc::clone(&seen);
        client
            .on_notification("notifications/progress", move |p| {
                s2.lock().unwrap().push(format!("b{}", p["n"]));
            })
            .await;
        let wildcard_hits = Arc::new(AtomicUsize::new(0));
        let w = Arc::clone(&wildcard_hits);
        client
            .on_any_notification(move |_method, _p| {
                w.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .await;

        for n in 1..=2 {
            let notif =
                json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"n": n}});
            in_tx.send(notif.to_string()).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "a2", "b2"]);
        assert_eq!(wildcard_hits.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unhandled_server_request_gets_method_not_found() {
        let (_client, mut out_rx, in_tx, _token) = make_client();

        let sampling = json!({"jsonrpc": "2.0", "id": "srv-1", "method": "sampling/createMessage"});
        in_tx.send(sampling.to_string()).unwrap();
        let reply = next_request(&mut out_rx).await;
        assert_eq!(reply["id"], "srv-1");
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_server_ping_answered_without_handler() {
        let (_client, mut out_rx, in_tx, _token) = make_client();

        in_tx
            .send(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}).to_string())
            .unwrap();
        let reply = next_request(&mut out_rx).await;
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn test_server_request_handler_can_call_back_into_client() {
        let (client, mut out_rx, in_tx, _token) = make_client();

        let weak = Arc::downgrade(&client);
        client
            .on_server_request("roots/list", move |_params| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = weak
                        .upgrade()
                        .ok_or_else(|| JsonRpcError::new(-32603, "client gone"))?;
                    let pong: Value = client
                        .request("ping", json!({}), Some(Duration::from_millis(500)))
                        .await
                        .map_err(|e| JsonRpcError::new(-32603, e.to_string()))?;
                    Ok(json!({ "pong": pong }))
                }) as BoxFuture<'static, std::result::Result<Value, JsonRpcError>>
            })
            .await;

        in_tx
            .send(json!({"jsonrpc": "2.0", "id": "srv-2", "method": "roots/list"}).to_string())
            .unwrap();

        // The handler's own request comes out first; answer it at once.
        let ping = next_request(&mut out_rx).await;
        assert_eq!(ping["method"], "ping");
        in_tx
            .send(json!({"jsonrpc": "2.0", "id": ping["id"], "result": "pong"}).to_string())
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_millis(400), next_request(&mut out_rx))
            .await
            .expect("handler reply arrives before the ping deadline");
        assert_eq!(reply["id"], "srv-2");
        assert_eq!(reply["result"]["pong"], "pong");
    }

    #[tokio::test]
    async fn test_notify_sends_without_id() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let client = JsonRpcClient::new(out_tx);

        client
            .notify("notifications/initialized", json!({}))
            .unwrap();

        let val = next_request(&mut out_rx).await;
        assert_eq!(val["method"], "notifications/initialized");
        assert!(val.get("id").is_none(), "notifications must not have an id");
    }

    #[test]
    fn test_notify_returns_error_when_channel_closed() {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        drop(out_rx);
        let client = JsonRpcClient::new(out_tx);
        assert!(matches!(
            client.notify("test", json!({})),
            Err(ToolwireError::Connection(_))
        ));
    }

    #[test]
    fn test_request_id_only_for_requests() {
        assert_eq!(request_id(r#"{"jsonrpc":"2.0","id":4,"method":"x"}"#), Some(4));
        assert_eq!(request_id(r#"{"jsonrpc":"2.0","method":"x"}"#), None);
        assert_eq!(request_id(r#"{"jsonrpc":"2.0","id":4,"result":{}}"#), None);
    }
}
