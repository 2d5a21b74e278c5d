//! MCP server: the listening side of the protocol
//!
//! An [`McpServer`] owns registered tool handlers, resources, and prompts,
//! and serves any number of client connections. Each connection walks the
//! same lifecycle:
//!
//! ```text
//! New --initialize--> InitResponded --notifications/initialized--> Ready --hang up--> Closed
//! ```
//!
//! Until a connection is `Ready`, everything except `initialize` and `ping`
//! is answered with `-32002`. Once ready, every request goes through the
//! session manager (`-32003` when the session is no longer active), then the
//! security engine (`-32001` with the [`Denial`](crate::security::Denial) as
//! `data`), and only then reaches a handler.
//!
//! Two hosts are provided: [`McpServer::serve_lines`] speaks newline-delimited
//! JSON over any async byte stream, and [`http::router`] mounts the server as
//! an axum `POST /mcp` endpoint.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinSet;

use crate::error::{Result, ToolwireError};
use crate::mcp::cursor::{CursorCodec, DEFAULT_CURSOR_VALIDITY};
use crate::mcp::registry::{PageLimits, ToolRegistry};
use crate::mcp::types::*;
use crate::metrics::RequestMetrics;
use crate::security::{credential_fingerprint, CallContext, Decision, SecurityPolicyEngine};
use crate::session::SessionManager;

pub mod http;

/// Capacity of the list-changed broadcast channel.
const NOTIFICATION_BUFFER: usize = 64;

/// Executes one tool.
///
/// Closures `Fn(Value) -> impl Future<Output = Result<CallToolResponse>>`
/// implement this trait, so most tools are registered inline.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the call's `arguments` (`{}` when absent).
    ///
    /// # Errors
    ///
    /// [`ToolwireError::ToolExecution`] is reported to the caller as
    /// `-32603`; other variants keep their own code.
    async fn call(&self, arguments: Value) -> Result<CallToolResponse>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResponse>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<CallToolResponse> {
        (self)(arguments).await
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Debug, Clone)]
struct RegisteredResource {
    descriptor: ResourceDescriptor,
    contents: ResourceContents,
}

#[derive(Debug, Clone)]
struct RegisteredPrompt {
    descriptor: PromptDescriptor,
    messages: Vec<PromptMessage>,
}

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Caller key supplied by the host (e.g. an `X-Caller-Id` header).
    pub caller: Option<String>,
    /// Credential presented by the peer.
    pub credential: Option<String>,
}

impl PeerIdentity {
    /// Name the caller explicitly.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Attach a credential.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Key used for rate limiting: the credential fingerprint when a
    /// credential is present, else the explicit caller, else `anonymous`.
    ///
    /// The caller label is peer-supplied, so it never outranks the
    /// credential.
    pub fn caller_key(&self) -> String {
        match (&self.credential, &self.caller) {
            (Some(credential), _) => credential_fingerprint(credential),
            (None, Some(caller)) => caller.clone(),
            (None, None) => "anonymous".to_string(),
        }
    }
}

/// Lifecycle phase of one server-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Waiting for `initialize`.
    New,
    /// `initialize` answered; waiting for `notifications/initialized`.
    InitResponded,
    /// Serving requests.
    Ready,
    /// The peer is gone.
    Closed,
}

#[derive(Debug)]
struct ConnectionState {
    identity: PeerIdentity,
    phase: ConnectionPhase,
    session_id: Option<String>,
    protocol_version: Option<String>,
}

/// Server-side state for one client connection.
#[derive(Debug)]
pub struct ServerConnection {
    state: Mutex<ConnectionState>,
}

impl ServerConnection {
    /// A fresh connection for `identity`.
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            state: Mutex::new(ConnectionState {
                identity,
                phase: ConnectionPhase::New,
                session_id: None,
                protocol_version: None,
            }),
        }
    }

    /// Current phase.
    pub async fn phase(&self) -> ConnectionPhase {
        self.state.lock().await.phase
    }

    /// Session bound during `initialize`.
    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    /// Negotiated protocol version.
    pub async fn protocol_version(&self) -> Option<String> {
        self.state.lock().await.protocol_version.clone()
    }

    /// Replace the credential, e.g. from a fresh request header.
    pub async fn set_credential(&self, credential: Option<String>) {
        if credential.is_some() {
            self.state.lock().await.identity.credential = credential;
        }
    }
}

struct ServerInner {
    info: Implementation,
    instructions: Option<String>,
    registry: ToolRegistry,
    tools: RwLock<Vec<RegisteredTool>>,
    resources: RwLock<Vec<RegisteredResource>>,
    prompts: RwLock<Vec<RegisteredPrompt>>,
    security: SecurityPolicyEngine,
    sessions: SessionManager,
    notifications: broadcast::Sender<String>,
}

/// The server. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for McpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.inner.info)
            .field("security", &self.inner.security)
            .finish_non_exhaustive()
    }
}

/// Builder for [`McpServer`].
#[derive(Debug)]
pub struct McpServerBuilder {
    info: Implementation,
    instructions: Option<String>,
    registry: Option<ToolRegistry>,
    security: SecurityPolicyEngine,
    sessions: SessionManager,
}

impl McpServerBuilder {
    /// Text returned as `instructions` from `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Registry used for the paginated list methods.
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Security engine applied to every request.
    pub fn security(mut self, security: SecurityPolicyEngine) -> Self {
        self.security = security;
        self
    }

    /// Session manager for connection sessions.
    pub fn sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = sessions;
        self
    }

    /// Finish building.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Config`] if no registry was given and a
    /// random cursor key cannot be generated.
    pub fn build(self) -> Result<McpServer> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => ToolRegistry::new(
                CursorCodec::random(DEFAULT_CURSOR_VALIDITY)?,
                PageLimits::default(),
            ),
        };
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Ok(McpServer {
            inner: Arc::new(ServerInner {
                info: self.info,
                instructions: self.instructions,
                registry,
                tools: RwLock::new(Vec::new()),
                resources: RwLock::new(Vec::new()),
                prompts: RwLock::new(Vec::new()),
                security: self.security,
                sessions: self.sessions,
                notifications,
            }),
        })
    }
}

impl McpServer {
    /// Start building a server that identifies itself as `info`.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolwire::mcp::server::McpServer;
    /// use toolwire::mcp::types::Implementation;
    ///
    /// let server = McpServer::builder(Implementation {
    ///     name: "demo".into(),
    ///     version: "0.1.0".into(),
    ///     description: None,
    /// })
    /// .build()
    /// .unwrap();
    /// assert_eq!(server.info().name, "demo");
    /// ```
    pub fn builder(info: Implementation) -> McpServerBuilder {
        McpServerBuilder {
            info,
            instructions: None,
            registry: None,
            security: SecurityPolicyEngine::allow_all(),
            sessions: SessionManager::default(),
        }
    }

    /// Server identity.
    pub fn info(&self) -> &Implementation {
        &self.inner.info
    }

    /// Catalog as clients see it.
    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Sessions of connected clients.
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Register (or replace) a tool and tell connected clients.
    ///
    /// # Errors
    ///
    /// Propagates registry errors; the previous catalog stays in place.
    pub async fn register_tool(
        &self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<()> {
        let handler: Arc<dyn ToolHandler> = Arc::new(handler);
        let descriptors = {
            let mut tools = self.inner.tools.write().await;
            match tools.iter_mut().find(|t| t.descriptor.name == descriptor.name) {
                Some(existing) => {
                    existing.descriptor = descriptor;
                    existing.handler = handler;
                }
                None => tools.push(RegisteredTool {
                    descriptor,
                    handler,
                }),
            }
            tools.iter().map(|t| t.descriptor.clone()).collect()
        };
        self.inner.registry.replace_tools(descriptors).await?;
        self.broadcast(NOTIF_TOOLS_LIST_CHANGED);
        Ok(())
    }

    /// Remove a tool. Returns `false` if it was not registered.
    pub async fn unregister_tool(&self, name: &str) -> Result<bool> {
        let descriptors = {
            let mut tools = self.inner.tools.write().await;
            let before = tools.len();
            tools.retain(|t| t.descriptor.name != name);
            if tools.len() == before {
                return Ok(false);
            }
            tools.iter().map(|t| t.descriptor.clone()).collect()
        };
        self.inner.registry.replace_tools(descriptors).await?;
        self.broadcast(NOTIF_TOOLS_LIST_CHANGED);
        Ok(true)
    }

    /// Register (or replace) a static resource.
    pub async fn register_resource(
        &self,
        descriptor: ResourceDescriptor,
        contents: ResourceContents,
    ) {
        let descriptors = {
            let mut resources = self.inner.resources.write().await;
            resources.retain(|r| r.descriptor.uri != descriptor.uri);
            resources.push(RegisteredResource {
                descriptor,
                contents,
            });
            resources.iter().map(|r| r.descriptor.clone()).collect()
        };
        self.inner.registry.replace_resources(descriptors).await;
        self.broadcast(NOTIF_RESOURCES_LIST_CHANGED);
    }

    /// Register (or replace) a prompt template.
    ///
    /// `{{name}}` in text blocks is replaced by the argument `name` when the
    /// prompt is fetched.
    pub async fn register_prompt(
        &self,
        descriptor: PromptDescriptor,
        messages: Vec<PromptMessage>,
    ) {
        let descriptors = {
            let mut prompts = self.inner.prompts.write().await;
            prompts.retain(|p| p.descriptor.name != descriptor.name);
            prompts.push(RegisteredPrompt {
                descriptor,
                messages,
            });
            prompts.iter().map(|p| p.descriptor.clone()).collect()
        };
        self.inner.registry.replace_prompts(descriptors).await;
        self.broadcast(NOTIF_PROMPTS_LIST_CHANGED);
    }

    fn broadcast(&self, method: &str) {
        if let Ok(raw) = serde_json::to_string(&JsonRpcNotification::new(method, None)) {
            // No receivers just means nobody is connected.
            let _ = self.inner.notifications.send(raw);
        }
    }

    /// Handle one decoded JSON-RPC message on `conn`.
    ///
    /// Returns the response for requests and `None` for notifications and
    /// for responses from the peer.
    pub async fn handle_message(
        &self,
        conn: &ServerConnection,
        message: Value,
    ) -> Option<JsonRpcResponse> {
        if message.get("method").is_none() {
            tracing::debug!("ignoring non-request message from client");
            return None;
        }
        let id = message.get("id").cloned().filter(|id| !id.is_null());
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError {
                        code: INVALID_REQUEST,
                        message: "invalid request".to_string(),
                        data: Some(json!({ "detail": e.to_string() })),
                    },
                ))
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::new(INVALID_REQUEST, "invalid jsonrpc version"),
            ));
        }

        let Some(id) = id else {
            self.handle_notification(conn, &request.method).await;
            return None;
        };

        let metrics = RequestMetrics::new(&request.method);
        let outcome = self
            .dispatch(conn, &request.method, request.params.filter(|p| !p.is_null()))
            .await;
        Some(match outcome {
            Ok(result) => {
                metrics.record_success();
                JsonRpcResponse::success(id, result)
            }
            Err(err) => {
                let error = err.to_rpc_error();
                metrics.record_error(error.code);
                tracing::debug!(
                    method = %request.method,
                    code = error.code,
                    "request failed: {}",
                    error.message
                );
                JsonRpcResponse::failure(Some(id), error)
            }
        })
    }

    async fn handle_notification(&self, conn: &ServerConnection, method: &str) {
        match method {
            METHOD_INITIALIZED => {
                let mut state = conn.state.lock().await;
                if state.phase == ConnectionPhase::InitResponded {
                    state.phase = ConnectionPhase::Ready;
                    tracing::info!(
                        caller = %state.identity.caller_key(),
                        session = state.session_id.as_deref().unwrap_or(""),
                        "client ready"
                    );
                }
            }
            other => tracing::debug!(method = other, "ignoring client notification"),
        }
    }

    async fn dispatch(
        &self,
        conn: &ServerConnection,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        match method {
            METHOD_INITIALIZE => return self.initialize(conn, params).await,
            METHOD_PING => return Ok(json!({})),
            _ => {}
        }

        let (identity, session_id) = {
            let state = conn.state.lock().await;
            if state.phase != ConnectionPhase::Ready {
                return Err(ToolwireError::Protocol {
                    code: NOT_INITIALIZED,
                    message: "not initialized".to_string(),
                    data: None,
                });
            }
            (state.identity.clone(), state.session_id.clone())
        };

        if let Some(session_id) = &session_id {
            self.inner.sessions.ensure_active(session_id).await?;
        }

        let credential = meta_api_key(params.as_ref()).or(identity.credential.clone());
        let caller = PeerIdentity {
            caller: identity.caller.clone(),
            credential: credential.clone(),
        }
        .caller_key();
        let mut ctx = CallContext::new(caller, method).with_credential(credential);
        if method == METHOD_TOOLS_CALL {
            let name = params.as_ref().and_then(|p| p.get("name")).and_then(Value::as_str);
            if let Some(name) = name {
                ctx = ctx.with_tool(name);
            }
        }
        if let Decision::Deny(denial) = self.inner.security.evaluate(&ctx) {
            return Err(ToolwireError::SecurityDenied(denial));
        }

        match method {
            METHOD_TOOLS_LIST => {
                let p: PaginatedParams = optional_params(params)?;
                let page = self
                    .inner
                    .registry
                    .list_paginated(p.cursor.as_deref(), p.page_size)
                    .await?;
                to_value(ListToolsResponse {
                    tools: page.items,
                    next_cursor: page.next_cursor,
                })
            }
            METHOD_TOOLS_CALL => {
                let call: CallToolParams = required_params(params)?;
                self.call_tool(session_id.as_deref(), call).await
            }
            METHOD_RESOURCES_LIST => {
                let p: PaginatedParams = optional_params(params)?;
                let page = self
                    .inner
                    .registry
                    .list_resources_paginated(p.cursor.as_deref(), p.page_size)
                    .await?;
                to_value(ListResourcesResponse {
                    resources: page.items,
                    next_cursor: page.next_cursor,
                })
            }
            METHOD_RESOURCES_READ => {
                let p: ReadResourceParams = required_params(params)?;
                let resources = self.inner.resources.read().await;
                let found = resources
                    .iter()
                    .find(|r| r.descriptor.uri == p.uri)
                    .ok_or_else(|| ToolwireError::Protocol {
                        code: INVALID_PARAMS,
                        message: format!("resource not found: {}", p.uri),
                        data: Some(json!({ "reason": "resource_not_found", "uri": p.uri })),
                    })?;
                to_value(ReadResourceResponse {
                    contents: vec![found.contents.clone()],
                })
            }
            METHOD_PROMPTS_LIST => {
                let p: PaginatedParams = optional_params(params)?;
                let page = self
                    .inner
                    .registry
                    .list_prompts_paginated(p.cursor.as_deref(), p.page_size)
                    .await?;
                to_value(ListPromptsResponse {
                    prompts: page.items,
                    next_cursor: page.next_cursor,
                })
            }
            METHOD_PROMPTS_GET => {
                let p: GetPromptParams = required_params(params)?;
                self.get_prompt(p).await
            }
            other => Err(ToolwireError::Protocol {
                code: METHOD_NOT_FOUND,
                message: format!("method not found: {other}"),
                data: None,
            }),
        }
    }

    async fn initialize(&self, conn: &ServerConnection, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = required_params(params)?;
        let version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.clone()
        } else {
            LATEST_PROTOCOL_VERSION.to_string()
        };

        let mut state = conn.state.lock().await;
        if state.phase != ConnectionPhase::New {
            return Err(ToolwireError::Protocol {
                code: INVALID_REQUEST,
                message: "connection already initialized".to_string(),
                data: None,
            });
        }
        if state.identity.credential.is_none() {
            state.identity.credential = meta_api_key_from(params.meta.as_ref());
        }

        let sessions = &self.inner.sessions;
        let session = sessions.create(Some(state.identity.caller_key()), None).await;
        sessions.begin_initialize(&session.id).await?;
        sessions
            .set_metadata(&session.id, "clientInfo", to_value(&params.client_info)?)
            .await?;
        sessions
            .set_metadata(&session.id, "protocolVersion", Value::String(version.clone()))
            .await?;
        sessions.complete_initialize(&session.id, true).await?;

        tracing::info!(
            client = %params.client_info.name,
            session = %session.id,
            protocol = %version,
            "client initialized"
        );
        state.session_id = Some(session.id);
        state.protocol_version = Some(version.clone());
        state.phase = ConnectionPhase::InitResponded;

        let list_changed = Some(json!({ "listChanged": true }));
        to_value(InitializeResponse {
            protocol_version: version,
            capabilities: ServerCapabilities {
                tools: list_changed.clone(),
                resources: list_changed.clone(),
                prompts: list_changed,
                ..Default::default()
            },
            server_info: self.inner.info.clone(),
            instructions: self.inner.instructions.clone(),
        })
    }

    async fn call_tool(&self, session_id: Option<&str>, call: CallToolParams) -> Result<Value> {
        let handler = self
            .inner
            .tools
            .read()
            .await
            .iter()
            .find(|t| t.descriptor.name == call.name)
            .map(|t| Arc::clone(&t.handler))
            .ok_or_else(|| ToolwireError::ToolNotFound(call.name.clone()))?;

        if let Some(session_id) = session_id {
            self.inner
                .sessions
                .push_message(session_id, json!({ "tool": call.name }))
                .await?;
        }

        let arguments = call.arguments.unwrap_or_else(|| json!({}));
        let response = handler.call(arguments).await?;
        to_value(response)
    }

    async fn get_prompt(&self, params: GetPromptParams) -> Result<Value> {
        let prompts = self.inner.prompts.read().await;
        let prompt = prompts
            .iter()
            .find(|p| p.descriptor.name == params.name)
            .ok_or_else(|| ToolwireError::Protocol {
                code: INVALID_PARAMS,
                message: format!("prompt not found: {}", params.name),
                data: Some(json!({ "reason": "prompt_not_found", "name": params.name })),
            })?;
        let arguments = params.arguments.unwrap_or_default();

        for arg in prompt.descriptor.arguments.iter().flatten() {
            if arg.required.unwrap_or(false) && !arguments.contains_key(&arg.name) {
                return Err(ToolwireError::Protocol {
                    code: INVALID_PARAMS,
                    message: format!("missing required argument: {}", arg.name),
                    data: None,
                });
            }
        }

        let messages = prompt
            .messages
            .iter()
            .map(|m| PromptMessage {
                role: m.role,
                content: render(&m.content, &arguments),
            })
            .collect();
        to_value(GetPromptResponse {
            description: prompt.descriptor.description.clone(),
            messages,
        })
    }

    /// Mark `conn` closed and drop its session from the table.
    pub async fn close_connection(&self, conn: &ServerConnection) {
        let session_id = {
            let mut state = conn.state.lock().await;
            state.phase = ConnectionPhase::Closed;
            state.session_id.take()
        };
        if let Some(id) = session_id {
            if let Err(e) = self.inner.sessions.remove(&id).await {
                tracing::debug!(session = %id, "removing session on hang-up: {e}");
            }
        }
    }

    /// Serve one client over newline-delimited JSON.
    ///
    /// Each request runs on its own task, so a slow tool does not hold up
    /// other calls; responses share one writer. Notifications from the
    /// client are handled in arrival order. Returns when `reader` reaches
    /// EOF and every in-flight request has been answered.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Io`] if writing to `writer` fails.
    pub async fn serve_lines<R, W>(
        &self,
        reader: R,
        writer: W,
        identity: PeerIdentity,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn = Arc::new(ServerConnection::new(identity));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = out_rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut notifications = self.inner.notifications.subscribe();
        let notify_tx = out_tx.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(raw) => {
                        if notify_tx.send(raw).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "client fell behind on notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut in_flight = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("read error from client: {e}");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("unparseable line from client: {e}");
                    let resp = JsonRpcResponse::failure(
                        None,
                        JsonRpcError {
                            code: PARSE_ERROR,
                            message: "parse error".to_string(),
                            data: Some(json!({ "detail": e.to_string() })),
                        },
                    );
                    send_response(&out_tx, &resp);
                    continue;
                }
            };

            let messages = match value {
                Value::Array(items) => items,
                other => vec![other],
            };
            for message in messages {
                let is_request = message.get("id").is_some_and(|id| !id.is_null());
                if !is_request {
                    if let Some(resp) = self.handle_message(&conn, message).await {
                        send_response(&out_tx, &resp);
                    }
                    continue;
                }
                let server = self.clone();
                let conn = Arc::clone(&conn);
                let tx = out_tx.clone();
                in_flight.spawn(async move {
                    if let Some(resp) = server.handle_message(&conn, message).await {
                        send_response(&tx, &resp);
                    }
                });
            }

            while let Some(Some(_)) = in_flight.join_next().now_or_never() {}
        }

        while in_flight.join_next().await.is_some() {}
        forwarder.abort();
        drop(out_tx);
        self.close_connection(&conn).await;

        match writer_task.await {
            Ok(result) => result.map_err(ToolwireError::from),
            Err(e) => Err(ToolwireError::Connection(format!("writer task failed: {e}"))),
        }
    }

    /// [`serve_lines`](Self::serve_lines) over this process's stdin and stdout.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve_lines(tokio::io::stdin(), tokio::io::stdout(), PeerIdentity::default())
            .await
    }
}

fn send_response(tx: &mpsc::UnboundedSender<String>, resp: &JsonRpcResponse) {
    match serde_json::to_string(resp) {
        Ok(raw) => {
            if tx.send(raw).is_err() {
                tracing::debug!("client writer gone; dropping response");
            }
        }
        Err(e) => tracing::warn!("failed to serialize response: {e}"),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn invalid_params(detail: impl fmt::Display) -> ToolwireError {
    ToolwireError::Protocol {
        code: INVALID_PARAMS,
        message: "invalid params".to_string(),
        data: Some(json!({ "detail": detail.to_string() })),
    }
}

fn required_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params.ok_or_else(|| invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(invalid_params)
}

fn optional_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T> {
    match params {
        Some(p) => serde_json::from_value(p).map_err(invalid_params),
        None => Ok(T::default()),
    }
}

fn meta_api_key_from(meta: Option<&Value>) -> Option<String> {
    meta.and_then(|m| m.get("apiKey"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn meta_api_key(params: Option<&Value>) -> Option<String> {
    meta_api_key_from(params.and_then(|p| p.get("_meta")))
}

fn render(content: &ContentBlock, arguments: &HashMap<String, String>) -> ContentBlock {
    match content {
        ContentBlock::Text { text } => {
            let mut out = text.clone();
            for (key, value) in arguments {
                out = out.replace(&format!("{{{{{key}}}}}"), value);
            }
            ContentBlock::Text { text: out }
        }
        other => other.clone(),
    }
}
