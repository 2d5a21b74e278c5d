//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! This module provides two types that represent the two phases of an MCP
//! client session:
//!
//! - [`McpProtocol`] -- an uninitialized client. Call [`McpProtocol::initialize`]
//!   to perform the JSON-RPC `initialize` / `notifications/initialized`
//!   handshake and receive an [`InitializedMcpProtocol`].
//! - [`InitializedMcpProtocol`] -- a negotiated session. The MCP methods
//!   (`tools/*`, `resources/*`, `prompts/*`, `ping`) are available as typed
//!   async methods.
//!
//! # Design
//!
//! The `*_page` methods issue exactly one request and hand back the server's
//! `nextCursor` untouched. `list_tools`, `list_resources`, and `list_prompts`
//! follow `nextCursor` until the server stops returning one.
//!
//! Neither type owns a transport; both share an `Arc<JsonRpcClient>` with the
//! read loop started by [`crate::mcp::client::connect_transport`] or
//! [`crate::mcp::client::start_read_loop`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Result, ToolwireError};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, GetPromptParams, GetPromptResponse,
    Implementation, InitializeParams, InitializeResponse, ListPromptsResponse,
    ListResourcesResponse, ListToolsResponse, PaginatedParams, PromptDescriptor,
    ReadResourceParams, ReadResourceResponse, ResourceDescriptor, ToolDescriptor, INVALID_REQUEST,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING,
    METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Identifies a specific capability that may be advertised by a server.
///
/// Used with [`InitializedMcpProtocol::capable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapabilityFlag {
    /// Server exposes tools via `tools/list` and `tools/call`.
    Tools,
    /// Server exposes resources via `resources/list` and `resources/read`.
    Resources,
    /// Server exposes prompts via `prompts/list` and `prompts/get`.
    Prompts,
    /// Server supports log notifications.
    Logging,
    /// Server advertises experimental capabilities.
    Experimental,
}

/// An uninitialized MCP client session.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use toolwire::mcp::client::JsonRpcClient;
/// use toolwire::mcp::protocol::McpProtocol;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<String>();
/// let _proto = McpProtocol::new(Arc::new(JsonRpcClient::new(tx)));
/// ```
#[derive(Debug)]
pub struct McpProtocol {
    client: Arc<JsonRpcClient>,
    meta: Option<Value>,
}

impl McpProtocol {
    /// Wrap a client whose read loop is already running.
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client, meta: None }
    }

    /// Attach `_meta` to the `initialize` request.
    ///
    /// Transports without a header channel (stdio) carry the caller's
    /// credential here as `{"apiKey": "..."}`.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Perform the MCP `initialize` / `notifications/initialized` handshake.
    ///
    /// Sends `initialize` with the latest protocol version, verifies that
    /// the server's chosen version is in [`SUPPORTED_PROTOCOL_VERSIONS`],
    /// then sends `notifications/initialized`.
    ///
    /// # Errors
    ///
    /// - [`ToolwireError::Protocol`] if the server picks an unsupported
    ///   protocol version.
    /// - [`ToolwireError::Connection`] if the connection is closed.
    /// - [`ToolwireError::Timeout`] if the server does not respond in time.
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                    meta: self.meta,
                },
                None,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(ToolwireError::Protocol {
                code: INVALID_REQUEST,
                message: format!(
                    "server selected unsupported protocol version {}",
                    response.protocol_version
                ),
                data: Some(json!({
                    "supported": SUPPORTED_PROTOCOL_VERSIONS,
                    "requested": response.protocol_version,
                })),
            });
        }

        self.client.notify(METHOD_INITIALIZED, json!({}))?;
        tracing::debug!(
            server = %response.server_info.name,
            version = %response.protocol_version,
            "MCP handshake complete"
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A negotiated MCP client session.
#[derive(Debug, Clone)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub client: Arc<JsonRpcClient>,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Check whether the server advertises a specific capability.
    pub fn capable(&self, capability: ServerCapabilityFlag) -> bool {
        let caps = &self.initialize_response.capabilities;
        match capability {
            ServerCapabilityFlag::Tools => caps.tools.is_some(),
            ServerCapabilityFlag::Resources => caps.resources.is_some(),
            ServerCapabilityFlag::Prompts => caps.prompts.is_some(),
            ServerCapabilityFlag::Logging => caps.logging.is_some(),
            ServerCapabilityFlag::Experimental => caps.experimental.is_some(),
        }
    }

    /// Protocol version the server selected.
    pub fn protocol_version(&self) -> &str {
        &self.initialize_response.protocol_version
    }

    /// Fetch one page of `tools/list`.
    pub async fn list_tools_page(
        &self,
        cursor: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListToolsResponse> {
        self.client
            .request(METHOD_TOOLS_LIST, PaginatedParams { cursor, page_size }, None)
            .await
    }

    /// List all tools, following `nextCursor` until the last page.
    ///
    /// # Errors
    ///
    /// Returns the first error from any page request.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_tools_page(cursor, None).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Invoke a named tool on the server.
    ///
    /// # Errors
    ///
    /// Returns the mapped error if the server answers with a JSON-RPC error;
    /// unknown tools surface as [`ToolwireError::ToolNotFound`], handler
    /// failures as [`ToolwireError::ToolExecution`], and policy rejections as
    /// [`ToolwireError::SecurityDenied`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        meta: Option<Value>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                    meta,
                },
                None,
            )
            .await
    }

    /// Fetch one page of `resources/list`.
    pub async fn list_resources_page(
        &self,
        cursor: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListResourcesResponse> {
        self.client
            .request(METHOD_RESOURCES_LIST, PaginatedParams { cursor, page_size }, None)
            .await
    }

    /// List all resources, following `nextCursor`.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_resources_page(cursor, None).await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(resources)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResponse> {
        self.client
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                None,
            )
            .await
    }

    /// Fetch one page of `prompts/list`.
    pub async fn list_prompts_page(
        &self,
        cursor: Option<String>,
        page_size: Option<usize>,
    ) -> Result<ListPromptsResponse> {
        self.client
            .request(METHOD_PROMPTS_LIST, PaginatedParams { cursor, page_size }, None)
            .await
    }

    /// List all prompts, following `nextCursor`.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>> {
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_prompts_page(cursor, None).await?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(prompts)
    }

    /// Render a prompt template.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResponse> {
        self.client
            .request(
                METHOD_PROMPTS_GET,
                GetPromptParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Send a `ping` and wait for the empty reply.
    pub async fn ping(&self) -> Result<()> {
        let _: Value = self.client.request(METHOD_PING, json!({}), None).await?;
        Ok(())
    }
}
