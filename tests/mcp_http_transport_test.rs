//! HTTP transport integration tests
//!
//! The first group drives [`HttpTransport`] against a `wiremock` server to
//! pin down status handling, SSE bodies, and session headers. The second
//! group runs the axum host from `mcp::server::http` on a loopback port and
//! connects to it through [`McpConnection`].
//!
//! # wiremock body helpers
//!
//! Use `set_body_raw(bytes, mime)` for SSE responses so that the
//! `Content-Type` is exactly `text/event-stream`. `set_body_string` forces
//! `text/plain`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolwire::mcp::connection::{ConnectOptions, McpConnection, ToolCallOutcome};
use toolwire::mcp::server::{http::router, McpServer};
use toolwire::mcp::transport::http::HttpTransport;
use toolwire::mcp::transport::{Transport, TransportConfig};
use toolwire::mcp::types::{CallToolResponse, Implementation, ToolDescriptor};
use toolwire::security::{ApiKeyPolicy, SecurityPolicyEngine};
use toolwire::session::{SessionManager, SessionState};
use toolwire::ToolwireError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_transport(base_url: &str) -> HttpTransport {
    HttpTransport::new(
        url::Url::parse(base_url).expect("valid url"),
        HashMap::new(),
        Duration::from_secs(5),
    )
    .expect("transport")
}

/// Collect buffered inbound messages until `deadline` passes without one.
async fn drain_receive(transport: &HttpTransport, deadline: Duration) -> Vec<String> {
    use futures::StreamExt;

    let mut messages = Vec::new();
    let mut stream = transport.receive();
    while let Ok(Some(msg)) = tokio::time::timeout(deadline, stream.next()).await {
        messages.push(msg);
    }
    messages
}

fn initialize_result() -> Vec<u8> {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "protocolVersion": "2025-11-25",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mock", "version": "1" }
        }
    })
    .to_string()
    .into_bytes()
}

// ---------------------------------------------------------------------------
// HttpTransport against wiremock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_json_response_is_forwarded() {
    let server = MockServer::start().await;
    let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
    Mock::given(method("POST"))
        .and(header("MCP-Protocol-Version", "2025-11-25"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json"),
        )
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#.to_string())
        .await
        .unwrap();

    let messages = drain_receive(&transport, Duration::from_millis(200)).await;
    assert_eq!(messages, vec![body.to_string()]);
}

#[tokio::test]
async fn test_sse_body_yields_every_event_and_drops_pings() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "event: ping\n",
        "data: keepalive\n",
        "\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"first\":true}}\n",
        "\n",
        "data: [PING]\n",
        "\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"second\":true}}\n",
        "\n",
    );
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string())
        .await
        .unwrap();

    let messages = drain_receive(&transport, Duration::from_millis(300)).await;
    assert_eq!(messages.len(), 2, "got: {messages:?}");
    let first: Value = serde_json::from_str(&messages[0]).unwrap();
    let second: Value = serde_json::from_str(&messages[1]).unwrap();
    assert_eq!(first["result"]["first"], true);
    assert_eq!(second["result"]["second"], true);
}

#[tokio::test]
async fn test_202_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
        .await
        .unwrap();

    assert!(drain_receive(&transport, Duration::from_millis(100))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_session_id_replayed_then_expired_on_404() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("initialize"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("MCP-Session-Id", "session-abc")
                .set_body_raw(initialize_result(), "application/json"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("MCP-Session-Id", "session-abc"))
        .and(body_string_contains("tools/list"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_string())
        .await
        .unwrap();
    assert_eq!(transport.session_id().await.as_deref(), Some("session-abc"));

    let result = transport
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#.to_string())
        .await;
    assert!(matches!(result, Err(ToolwireError::SessionExpired(_))));
    assert!(transport.session_id().await.is_none());

    server.verify().await;
}

#[tokio::test]
async fn test_401_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Bearer realm=\"mcp\""),
        )
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    let result = transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#.to_string())
        .await;
    match result {
        Err(ToolwireError::Authentication(challenge)) => assert!(challenge.contains("Bearer")),
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_deletes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("MCP-Session-Id", "to-delete")
                .set_body_raw(initialize_result(), "application/json"),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(header("MCP-Session-Id", "to-delete"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#.to_string())
        .await
        .unwrap();
    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert!(transport
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#.to_string())
        .await
        .is_err());
    server.verify().await;
}

// ---------------------------------------------------------------------------
// McpConnection against the axum host
// ---------------------------------------------------------------------------

async fn start_host(security: SecurityPolicyEngine) -> (url::Url, McpServer) {
    let server = McpServer::builder(Implementation {
        name: "http-host".to_string(),
        version: "1.0.0".to_string(),
        description: None,
    })
    .security(security)
    .build()
    .unwrap();
    server
        .register_tool(
            ToolDescriptor::new("echo", json!({ "type": "object" })),
            |args: Value| async move {
                let text = args["text"].as_str().unwrap_or_default().to_string();
                Ok::<_, ToolwireError>(CallToolResponse::text(text))
            },
        )
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(server.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = url::Url::parse(&format!("http://{addr}/mcp")).unwrap();
    (url, server)
}

fn http_config(url: url::Url, headers: &[(&str, &str)]) -> TransportConfig {
    TransportConfig::Http {
        url,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        timeout_ms: 5_000,
    }
}

#[tokio::test]
async fn test_connection_over_http_host() {
    let (url, server) = start_host(SecurityPolicyEngine::allow_all()).await;

    let conn = McpConnection::connect("http", &http_config(url, &[]), ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(conn.server_info().name, "http-host");
    assert_eq!(conn.list_tools().await.len(), 1);

    let calls = (0..10).map(|i| conn.call_tool("echo", json!({ "text": format!("m{i}") })));
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        let response = result.unwrap().completed().unwrap();
        assert_eq!(response.text_content(), format!("m{i}"));
    }

    conn.ping().await.unwrap();
    conn.disconnect().await.unwrap();

    // The DELETE dropped the server-side session.
    assert!(server.sessions().list().await.is_empty());
}

#[tokio::test]
async fn test_api_key_header_is_enforced_by_host() {
    let engine = SecurityPolicyEngine::new(Arc::new(ApiKeyPolicy::new(["k1"])));
    let (url, _server) = start_host(engine).await;

    let conn = McpConnection::connect(
        "http",
        &http_config(url.clone(), &[("X-API-Key", "k1")]),
        ConnectOptions::default(),
    )
    .await
    .unwrap();
    let outcome = conn.call_tool("echo", json!({ "text": "ok" })).await.unwrap();
    assert!(matches!(outcome, ToolCallOutcome::Completed(_)));
    conn.disconnect().await.unwrap();

    let denied = McpConnection::connect(
        "http",
        &http_config(url, &[("Authorization", "Bearer wrong")]),
        ConnectOptions::default(),
    )
    .await
    .unwrap();
    assert!(denied.catalog_denial().is_some());
    let outcome = denied.call_tool("echo", json!({ "text": "no" })).await.unwrap();
    assert!(matches!(outcome, ToolCallOutcome::Denied(_)));
    denied.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_client_session_tracks_http_connection() {
    let (url, _server) = start_host(SecurityPolicyEngine::allow_all()).await;
    let sessions = SessionManager::default();

    let conn = McpConnection::connect(
        "http",
        &http_config(url, &[]),
        ConnectOptions {
            sessions: Some(sessions.clone()),
            ..ConnectOptions::default()
        },
    )
    .await
    .unwrap();
    let id = conn.session_id().unwrap().to_string();
    assert_eq!(sessions.get(&id).await.unwrap().state, SessionState::Active);

    conn.disconnect().await.unwrap();
    assert_eq!(sessions.get(&id).await.unwrap().state, SessionState::Closed);
}
