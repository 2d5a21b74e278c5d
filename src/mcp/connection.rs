//! Client-side connection to one MCP server
//!
//! [`McpConnection`] is what the rest of an agent talks to. It opens the
//! transport, performs the handshake, keeps a [`ToolRegistry`] of what the
//! server offers, and forwards calls. Optional collaborators:
//!
//! - a [`SessionManager`]: the connection owns one session for its lifetime
//!   and suspends it if the transport drops without [`McpConnection::disconnect`];
//! - a local [`SecurityPolicyEngine`]: calls are checked before they leave
//!   the process.
//!
//! Denials, local or remote, come back as [`ToolCallOutcome::Denied`]. A
//! server that refuses the initial catalog load does not fail the connect;
//! the refusal is kept in [`McpConnection::catalog_denial`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ToolwireError};
use crate::mcp::client::{connect_transport, JsonRpcClient, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::cursor::{CursorCodec, DEFAULT_CURSOR_VALIDITY};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol, ServerCapabilityFlag};
use crate::mcp::registry::{Page, PageLimits, SearchPage, SearchQuery, ToolRegistry};
use crate::mcp::transport::{self, Transport, TransportConfig};
use crate::mcp::types::*;
use crate::security::{CallContext, Decision, Denial, SecurityPolicyEngine};
use crate::session::SessionManager;

/// Default bound on transport establishment plus `initialize`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Settings for [`McpConnection::connect`].
#[derive(Debug)]
pub struct ConnectOptions {
    /// How this client introduces itself.
    pub client_info: Implementation,
    /// Capabilities advertised during `initialize`.
    pub capabilities: ClientCapabilities,
    /// Default per-request deadline.
    pub request_timeout: Duration,
    /// Deadline shared by transport establishment and `initialize`.
    pub handshake_timeout: Duration,
    /// Credential sent as `_meta.apiKey` with `initialize` and every call.
    pub credential: Option<String>,
    /// Caller key for the local policy.
    pub caller: String,
    /// Local policy applied before calls leave the process.
    pub security: Option<SecurityPolicyEngine>,
    /// Manager that owns this connection's session.
    pub sessions: Option<SessionManager>,
    /// `user_id` recorded on the session.
    pub user_id: Option<String>,
    /// Cursor codec for local pagination; a random key when `None`.
    pub cursor_codec: Option<CursorCodec>,
    /// Page size bounds for local pagination.
    pub page_limits: PageLimits,
    /// Refresh the registry when the server announces a list change.
    pub auto_refresh: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
            },
            capabilities: ClientCapabilities::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            credential: None,
            caller: "local".to_string(),
            security: None,
            sessions: None,
            user_id: None,
            cursor_codec: None,
            page_limits: PageLimits::default(),
            auto_refresh: true,
        }
    }
}

/// Result of [`McpConnection::call_tool`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// The tool ran. `is_error` inside may still be set by the tool.
    Completed(CallToolResponse),
    /// A policy refused the call, locally or on the server.
    Denied(Denial),
}

impl ToolCallOutcome {
    /// The response, if the call was not denied.
    pub fn completed(self) -> Option<CallToolResponse> {
        match self {
            ToolCallOutcome::Completed(r) => Some(r),
            ToolCallOutcome::Denied(_) => None,
        }
    }
}

/// A live connection to one server.
#[derive(Debug)]
pub struct McpConnection {
    name: String,
    transport: Arc<dyn Transport>,
    protocol: InitializedMcpProtocol,
    registry: Arc<ToolRegistry>,
    sessions: Option<SessionManager>,
    session_id: Option<String>,
    security: Option<SecurityPolicyEngine>,
    caller: String,
    credential: Option<String>,
    catalog_denial: Option<Denial>,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

impl McpConnection {
    /// Open `config` and complete the handshake.
    ///
    /// # Errors
    ///
    /// - [`ToolwireError::Connection`] if the transport cannot be opened.
    /// - [`ToolwireError::Timeout`] if opening the transport and answering
    ///   `initialize` together take longer than the handshake timeout; the
    ///   transport is closed (a spawned process is killed).
    /// - Any error from `initialize` or the first `tools/list`, except a
    ///   security denial of the catalog load.
    pub async fn connect(
        name: impl Into<String>,
        config: &TransportConfig,
        options: ConnectOptions,
    ) -> Result<Self> {
        let name = name.into();
        tracing::info!(server = %name, transport = config.kind(), "connecting");
        let deadline = Instant::now() + options.handshake_timeout;
        let transport = transport::open(config, options.handshake_timeout).await?;
        Self::establish_by(name, transport, options, deadline).await
    }

    /// Complete the handshake over an already-open transport.
    pub async fn establish(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: ConnectOptions,
    ) -> Result<Self> {
        let deadline = Instant::now() + options.handshake_timeout;
        Self::establish_by(name, transport, options, deadline).await
    }

    async fn establish_by(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: ConnectOptions,
        deadline: Instant,
    ) -> Result<Self> {
        let name = name.into();
        let cancel = CancellationToken::new();
        let (client, read_loop) =
            connect_transport(Arc::clone(&transport), cancel.clone(), options.request_timeout);

        let session_id = match &options.sessions {
            Some(sessions) => {
                let session = sessions.create(options.user_id.clone(), None).await;
                sessions.begin_initialize(&session.id).await?;
                Some(session.id)
            }
            None => None,
        };

        let mut handshake = McpProtocol::new(Arc::clone(&client));
        if let Some(key) = &options.credential {
            handshake = handshake.with_meta(json!({ "apiKey": key }));
        }
        let started = Instant::now();
        let initialized = match tokio::time::timeout_at(
            deadline,
            handshake.initialize(options.client_info.clone(), options.capabilities.clone()),
        )
        .await
        {
            Ok(Ok(p)) => Ok(p),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ToolwireError::Timeout {
                method: METHOD_INITIALIZE.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };
        let sessions = options.sessions.as_ref();
        let protocol = match initialized {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(server = %name, "handshake failed: {e}");
                abandon(&transport, &cancel, sessions, session_id.as_deref()).await;
                return Err(e);
            }
        };

        if let (Some(sessions), Some(id)) = (sessions, &session_id) {
            sessions.complete_initialize(id, true).await?;
            let server_info = serde_json::to_value(&protocol.initialize_response.server_info)?;
            sessions.set_metadata(id, "server", server_info).await?;
        }

        let codec = match options.cursor_codec {
            Some(codec) => codec,
            None => CursorCodec::random(DEFAULT_CURSOR_VALIDITY)?,
        };
        let registry = Arc::new(ToolRegistry::new(codec, options.page_limits));
        let catalog_denial = match load_catalog(&registry, &protocol).await {
            Ok(denial) => denial,
            Err(e) => {
                abandon(&transport, &cancel, sessions, session_id.as_deref()).await;
                return Err(e);
            }
        };

        if options.auto_refresh {
            watch_list_changes(&client, &registry, &protocol).await;
        }

        let closing = Arc::new(AtomicBool::new(false));
        watch_disconnect(
            name.clone(),
            client.disconnected(),
            Arc::clone(&closing),
            options.sessions.clone(),
            session_id.clone(),
        );

        tracing::info!(
            server = %name,
            protocol = %protocol.protocol_version(),
            tools = registry.snapshot().await.tools.len(),
            "connected"
        );

        Ok(Self {
            name,
            transport,
            protocol,
            registry,
            sessions: options.sessions,
            session_id,
            security: options.security,
            caller: options.caller,
            credential: options.credential,
            catalog_denial,
            cancel,
            closing,
            read_loop: Mutex::new(Some(read_loop)),
        })
    }

    /// Configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the server said about itself.
    pub fn server_info(&self) -> &Implementation {
        &self.protocol.initialize_response.server_info
    }

    /// The negotiated protocol.
    pub fn protocol(&self) -> &InitializedMcpProtocol {
        &self.protocol
    }

    /// The cached catalog.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Session owned by this connection.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The denial the server returned for the initial `tools/list`, if it
    /// refused it. The catalog is empty in that case.
    pub fn catalog_denial(&self) -> Option<&Denial> {
        self.catalog_denial.as_ref()
    }

    /// Whether the transport is still up.
    pub fn is_connected(&self) -> bool {
        !self.protocol.client.disconnected().is_cancelled()
    }

    /// Every cached tool, in server order.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list_tools().await
    }

    /// One page of cached tools.
    pub async fn list_tools_paginated(
        &self,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<ToolDescriptor>> {
        self.registry.list_paginated(cursor, page_size).await
    }

    /// Filtered, paginated view of the cached tools.
    pub async fn search_tools(&self, query: &SearchQuery) -> Result<SearchPage> {
        self.registry.search(query).await
    }

    /// Re-fetch the tool catalog from the server.
    pub async fn refresh_tools(&self) -> Result<usize> {
        self.registry.refresh_tools(&self.protocol).await
    }

    /// Cached resources.
    pub async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.registry.snapshot().await.resources.clone()
    }

    /// Cached prompts.
    pub async fn list_prompts(&self) -> Vec<PromptDescriptor> {
        self.registry.snapshot().await.prompts.clone()
    }

    /// Read a resource from the server.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResponse> {
        self.ensure_session().await?;
        self.protocol.read_resource(uri).await
    }

    /// Render a prompt on the server.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResponse> {
        self.ensure_session().await?;
        self.protocol.get_prompt(name, Some(arguments)).await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.protocol.ping().await
    }

    /// Invoke `name` with `arguments`.
    ///
    /// The local policy runs first; the call then goes to the server, whose
    /// own policy may also deny it. Both kinds of denial are returned as
    /// [`ToolCallOutcome::Denied`].
    ///
    /// # Errors
    ///
    /// - [`ToolwireError::SessionExpired`] if the owned session is not active.
    /// - [`ToolwireError::ToolNotFound`], [`ToolwireError::ToolExecution`],
    ///   [`ToolwireError::Timeout`], [`ToolwireError::Connection`] as
    ///   reported by the server or transport.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallOutcome> {
        self.ensure_session().await?;

        if let Some(engine) = &self.security {
            let ctx = CallContext::new(self.caller.clone(), METHOD_TOOLS_CALL)
                .with_credential(self.credential.clone())
                .with_tool(name);
            if let Decision::Deny(denial) = engine.evaluate(&ctx) {
                return Ok(ToolCallOutcome::Denied(denial));
            }
        }

        let meta = self.credential.as_ref().map(|key| json!({ "apiKey": key }));
        let outcome = match self.protocol.call_tool(name, Some(arguments), meta).await {
            Ok(response) => ToolCallOutcome::Completed(response),
            Err(ToolwireError::SecurityDenied(denial)) => {
                tracing::debug!(server = %self.name, tool = name, "server denied call: {denial}");
                ToolCallOutcome::Denied(denial)
            }
            Err(e) => return Err(e),
        };

        if let (Some(sessions), Some(id)) = (&self.sessions, &self.session_id) {
            let entry = match &outcome {
                ToolCallOutcome::Completed(r) => {
                    json!({ "tool": name, "isError": r.is_error.unwrap_or(false) })
                }
                ToolCallOutcome::Denied(d) => json!({ "tool": name, "denied": d.policy }),
            };
            sessions.push_message(id, entry).await?;
        }
        Ok(outcome)
    }

    async fn ensure_session(&self) -> Result<()> {
        if let (Some(sessions), Some(id)) = (&self.sessions, &self.session_id) {
            sessions.ensure_active(id).await?;
        }
        Ok(())
    }

    /// Tear down the connection: stop the I/O tasks, close the transport,
    /// and close the owned session. Pending calls fail with
    /// [`ToolwireError::Connection`]. Calling it twice is harmless.
    pub async fn disconnect(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(server = %self.name, "disconnecting");
        self.cancel.cancel();
        let closed = self.transport.close().await;
        if let Some(read_loop) = self.read_loop.lock().await.take() {
            let _ = read_loop.await;
        }
        if let (Some(sessions), Some(id)) = (&self.sessions, &self.session_id) {
            sessions.close(id).await?;
        }
        closed
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fill `registry` from the server. A security denial of `tools/list` is
/// returned as a value and leaves the catalog empty.
async fn load_catalog(
    registry: &ToolRegistry,
    protocol: &InitializedMcpProtocol,
) -> Result<Option<Denial>> {
    match registry.refresh_tools(protocol).await {
        Ok(_) => {}
        Err(ToolwireError::SecurityDenied(denial)) => {
            tracing::warn!("tools/list denied: {denial}");
            return Ok(Some(denial));
        }
        Err(e) => return Err(e),
    }
    if protocol.capable(ServerCapabilityFlag::Resources) {
        if let Err(e) = registry.refresh_resources(protocol).await {
            tracing::warn!("resources/list failed: {e}");
        }
    }
    if protocol.capable(ServerCapabilityFlag::Prompts) {
        if let Err(e) = registry.refresh_prompts(protocol).await {
            tracing::warn!("prompts/list failed: {e}");
        }
    }
    Ok(None)
}

async fn abandon(
    transport: &Arc<dyn Transport>,
    cancel: &CancellationToken,
    sessions: Option<&SessionManager>,
    session_id: Option<&str>,
) {
    cancel.cancel();
    if let Err(e) = transport.close().await {
        tracing::debug!("closing transport after failed handshake: {e}");
    }
    if let (Some(sessions), Some(id)) = (sessions, session_id) {
        let _ = sessions.complete_initialize(id, false).await;
        let _ = sessions.close(id).await;
    }
}

/// Refresh the matching catalog whenever the server announces a change.
///
/// The listeners hold the client weakly so they do not keep it alive.
async fn watch_list_changes(
    client: &Arc<JsonRpcClient>,
    registry: &Arc<ToolRegistry>,
    protocol: &InitializedMcpProtocol,
) {
    for method in [
        NOTIF_TOOLS_LIST_CHANGED,
        NOTIF_RESOURCES_LIST_CHANGED,
        NOTIF_PROMPTS_LIST_CHANGED,
    ] {
        let weak: Weak<JsonRpcClient> = Arc::downgrade(client);
        let registry = Arc::clone(registry);
        let initialize_response = protocol.initialize_response.clone();
        client
            .on_notification(method, move |_params| {
                let Some(client) = weak.upgrade() else { return };
                let protocol = InitializedMcpProtocol {
                    client,
                    initialize_response: initialize_response.clone(),
                };
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let refreshed = match method {
                        NOTIF_TOOLS_LIST_CHANGED => registry.refresh_tools(&protocol).await,
                        NOTIF_RESOURCES_LIST_CHANGED => {
                            registry.refresh_resources(&protocol).await
                        }
                        _ => registry.refresh_prompts(&protocol).await,
                    };
                    match refreshed {
                        Ok(n) => {
                            tracing::debug!(notification = method, count = n, "catalog refreshed")
                        }
                        Err(e) => {
                            tracing::warn!(notification = method, "catalog refresh failed: {e}")
                        }
                    }
                });
            })
            .await;
    }
}

/// Suspend the owned session if the transport goes away on its own.
fn watch_disconnect(
    name: String,
    disconnected: CancellationToken,
    closing: Arc<AtomicBool>,
    sessions: Option<SessionManager>,
    session_id: Option<String>,
) {
    tokio::spawn(async move {
        disconnected.cancelled().await;
        if closing.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(server = %name, "connection lost");
        if let (Some(sessions), Some(id)) = (sessions, session_id) {
            if let Err(e) = sessions.suspend(&id).await {
                tracing::debug!(session = %id, "not suspended after disconnect: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::server::{McpServer, PeerIdentity, ServerConnection};
    use crate::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
    use crate::security::{ApiKeyPolicy, DenialReason, RateLimitPolicy};
    use crate::session::SessionState;

    async fn demo_server(security: SecurityPolicyEngine) -> McpServer {
        crate::mcp::server::tests::demo_server(security).await
    }

    type Inbound = tokio::sync::mpsc::UnboundedSender<String>;

    /// Answer everything the client sends by running it through `server`.
    fn wire(server: McpServer, mut handle: FakeTransportHandle) -> (JoinHandle<()>, Inbound) {
        let inbound = handle.inbound_tx.clone();
        let task = tokio::spawn(async move {
            let conn = ServerConnection::new(PeerIdentity::default());
            while let Some(raw) = handle.outbound_rx.recv().await {
                let Ok(value) = serde_json::from_str::<Value>(&raw) else {
                    continue;
                };
                if let Some(resp) = server.handle_message(&conn, value).await {
                    let _ = handle.inbound_tx.send(serde_json::to_string(&resp).unwrap());
                }
            }
        });
        (task, inbound)
    }

    async fn connected(server: McpServer, options: ConnectOptions) -> (McpConnection, Inbound) {
        let (transport, handle) = FakeTransport::new();
        let (_task, inbound) = wire(server, handle);
        let conn = McpConnection::establish("demo", Arc::new(transport), options)
            .await
            .unwrap();
        (conn, inbound)
    }

    async fn open_server() -> McpServer {
        demo_server(SecurityPolicyEngine::allow_all()).await
    }

    #[tokio::test]
    async fn test_connect_loads_catalog() {
        let (conn, _inbound) = connected(open_server().await, ConnectOptions::default()).await;
        assert_eq!(conn.server_info().name, "test-server");
        assert!(conn.catalog_denial().is_none());
        let names: Vec<String> = conn.list_tools().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "fail"]);
        // Idempotent: listing does not touch the server.
        assert_eq!(conn.list_tools().await.len(), 2);
    }

    #[tokio::test]
    async fn test_call_tool_completed_and_errors() {
        let (conn, _inbound) = connected(open_server().await, ConnectOptions::default()).await;

        let done = conn.call_tool("echo", json!({"text": "hello"})).await.unwrap();
        assert_eq!(done.completed().unwrap().text_content(), "hello");

        let failed = conn.call_tool("fail", json!({})).await.unwrap_err();
        assert!(matches!(failed, ToolwireError::ToolExecution(_)));

        let missing = conn.call_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(missing, ToolwireError::ToolNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_remote_denial_is_an_outcome() {
        let engine = SecurityPolicyEngine::new(Arc::new(ApiKeyPolicy::new(["k1"])));
        // The server refuses the catalog load too; connecting still succeeds.
        let server = demo_server(engine).await;
        let (conn, _inbound) = connected(server, ConnectOptions::default()).await;
        let refused = conn.catalog_denial().unwrap();
        assert_eq!(refused.policy, "api-key");
        assert!(conn.list_tools().await.is_empty());

        match conn.call_tool("echo", json!({})).await.unwrap() {
            ToolCallOutcome::Denied(d) => assert_eq!(d.reason, DenialReason::Unauthenticated),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_credential_is_forwarded() {
        let engine = SecurityPolicyEngine::new(Arc::new(ApiKeyPolicy::new(["k1"])));
        let options = ConnectOptions {
            credential: Some("k1".to_string()),
            ..Default::default()
        };
        let (conn, _inbound) = connected(demo_server(engine).await, options).await;
        let outcome = conn.call_tool("echo", json!({"text": "ok"})).await.unwrap();
        assert!(matches!(outcome, ToolCallOutcome::Completed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_policy_denies_before_sending() {
        let options = ConnectOptions {
            security: Some(SecurityPolicyEngine::new(Arc::new(RateLimitPolicy::new(
                1,
                Duration::from_secs(1),
            )))),
            ..Default::default()
        };
        let (conn, _inbound) = connected(open_server().await, options).await;
        let first = conn.call_tool("echo", json!({})).await.unwrap();
        assert!(matches!(first, ToolCallOutcome::Completed(_)));
        match conn.call_tool("echo", json!({})).await.unwrap() {
            ToolCallOutcome::Denied(d) => assert_eq!(d.policy, "rate-limit"),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_changed_refreshes_registry() {
        let server = demo_server(SecurityPolicyEngine::allow_all()).await;
        let (conn, inbound) = connected(server.clone(), ConnectOptions::default()).await;

        let add = ToolDescriptor::new("add", json!({"type": "object"}));
        server
            .register_tool(add, |_args: Value| async move {
                Ok::<_, ToolwireError>(CallToolResponse::text("3"))
            })
            .await
            .unwrap();
        inbound
            .send(json!({"jsonrpc": "2.0", "method": NOTIF_TOOLS_LIST_CHANGED}).to_string())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.list_tools().await.len() != 3 {
            assert!(Instant::now() < deadline, "registry was not refreshed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_closes_transport() {
        let (transport, handle) = FakeTransport::new();
        let options = ConnectOptions {
            handshake_timeout: Duration::from_millis(2000),
            sessions: Some(SessionManager::default()),
            ..Default::default()
        };
        let sessions = options.sessions.clone().unwrap();

        let err = McpConnection::establish("silent", Arc::new(transport), options)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolwireError::Timeout { ref method, .. } if method == "initialize"));
        assert!(handle.is_closed());
        let all = sessions.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_deadline_is_shared_with_transport_open() {
        let (transport, _handle) = FakeTransport::new();
        let options = ConnectOptions {
            handshake_timeout: Duration::from_millis(2000),
            ..Default::default()
        };
        // Opening the transport already used 1700ms of the budget.
        let started = Instant::now();
        let deadline = started + Duration::from_millis(300);

        let err = McpConnection::establish_by("slow-open", Arc::new(transport), options, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolwireError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_session_lifecycle_follows_connection() {
        let sessions = SessionManager::default();
        let options = ConnectOptions {
            sessions: Some(sessions.clone()),
            user_id: Some("u1".to_string()),
            ..Default::default()
        };
        let (conn, _inbound) = connected(open_server().await, options).await;
        let id = conn.session_id().unwrap().to_string();
        assert_eq!(sessions.get(&id).await.unwrap().state, SessionState::Active);

        conn.call_tool("echo", json!({"text": "a"})).await.unwrap();
        assert_eq!(sessions.get(&id).await.unwrap().messages.len(), 1);

        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(sessions.get(&id).await.unwrap().state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_unexpected_disconnect_suspends_session() {
        let sessions = SessionManager::default();
        let (transport, handle) = FakeTransport::new();
        let (task, inbound) = wire(open_server().await, handle);
        let options = ConnectOptions {
            sessions: Some(sessions.clone()),
            ..Default::default()
        };
        let conn = McpConnection::establish("demo", Arc::new(transport), options)
            .await
            .unwrap();
        let id = conn.session_id().unwrap().to_string();

        // Dropping every inbound sender ends the client's receive stream.
        task.abort();
        let _ = task.await;
        drop(inbound);

        let deadline = Instant::now() + Duration::from_secs(2);
        while sessions.get(&id).await.unwrap().state != SessionState::Suspended {
            assert!(Instant::now() < deadline, "session was not suspended");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!conn.is_connected());
        let err = conn.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolwireError::SessionExpired(_)));
    }
}
