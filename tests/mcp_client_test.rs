//! Client/server integration tests over an in-process byte stream
//!
//! An [`McpServer`] is hosted with `serve_lines` on one end of a
//! `tokio::io::duplex` pipe; the other end is bridged to a
//! [`FakeTransport`] handed to [`McpConnection::establish`]. Everything
//! between the two, framing included, is the real code path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use toolwire::mcp::connection::{ConnectOptions, McpConnection};
use toolwire::mcp::cursor::{CursorCodec, DEFAULT_CURSOR_VALIDITY};
use toolwire::mcp::registry::{PageLimits, ToolRegistry};
use toolwire::mcp::server::{McpServer, PeerIdentity};
use toolwire::mcp::transport::fake::FakeTransport;
use toolwire::mcp::types::{CallToolResponse, Implementation, ToolDescriptor};
use toolwire::session::{SessionManager, SessionState};
use toolwire::ToolwireError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn info() -> Implementation {
    Implementation {
        name: "in-process".to_string(),
        version: "1.0.0".to_string(),
        description: None,
    }
}

/// Server with a `slow` tool that sleeps `ms` and then echoes `tag`.
async fn slow_server() -> McpServer {
    let server = McpServer::builder(info()).build().unwrap();
    server
        .register_tool(
            ToolDescriptor::new("slow", json!({ "type": "object" })),
            |args: Value| async move {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let tag = args["tag"].as_str().unwrap_or_default().to_string();
                Ok::<_, ToolwireError>(CallToolResponse::text(tag))
            },
        )
        .await
        .unwrap();
    server
}

/// Host `server` on a duplex pipe and connect to it.
async fn connect_in_process(server: McpServer, options: ConnectOptions) -> McpConnection {
    let (transport, handle) = FakeTransport::new();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let (server_read, server_write) = tokio::io::split(server_io);
    tokio::spawn(async move {
        let _ = server
            .serve_lines(server_read, server_write, PeerIdentity::default())
            .await;
    });

    let (client_read, mut client_write) = tokio::io::split(client_io);
    let mut outbound_rx = handle.outbound_rx;
    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let line = format!("{msg}\n");
            if client_write.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = client_write.shutdown().await;
    });

    let inbound_tx = handle.inbound_tx;
    tokio::spawn(async move {
        let mut lines = BufReader::new(client_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if inbound_tx.send(line).is_err() {
                break;
            }
        }
    });

    McpConnection::establish("in-process", Arc::new(transport), options)
        .await
        .expect("in-process connect")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_calls_resolve_by_id() {
    let conn = connect_in_process(slow_server().await, ConnectOptions::default()).await;

    // Later calls finish first, so responses arrive in reverse order.
    let calls = (0..20u64).map(|i| {
        conn.call_tool(
            "slow",
            json!({ "ms": (20 - i) * 5, "tag": format!("call-{i}") }),
        )
    });
    let results = futures::future::join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        let response = result.unwrap().completed().unwrap();
        assert_eq!(response.text_content(), format!("call-{i}"));
    }
    assert_eq!(conn.protocol().client.pending_count().await, 0);

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_per_request_timeout_leaves_connection_usable() {
    let conn = connect_in_process(
        slow_server().await,
        ConnectOptions {
            request_timeout: Duration::from_millis(100),
            ..ConnectOptions::default()
        },
    )
    .await;

    let timed_out = conn.call_tool("slow", json!({ "ms": 1_000 })).await;
    assert!(matches!(timed_out, Err(ToolwireError::Timeout { .. })));

    let ok = conn
        .call_tool("slow", json!({ "ms": 0, "tag": "after" }))
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(ok.text_content(), "after");

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_rejects_in_flight_calls() {
    let conn = connect_in_process(slow_server().await, ConnectOptions::default()).await;

    let (call, closed) = tokio::join!(conn.call_tool("slow", json!({ "ms": 10_000 })), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.disconnect().await
    });

    closed.unwrap();
    assert!(matches!(call, Err(ToolwireError::Connection(_))));
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_refresh_follows_server_cursors() {
    let server_registry = ToolRegistry::new(
        CursorCodec::random(DEFAULT_CURSOR_VALIDITY).unwrap(),
        PageLimits {
            default_page_size: 2,
            max_page_size: 2,
        },
    );
    let server = McpServer::builder(info())
        .registry(server_registry)
        .build()
        .unwrap();
    for i in 0..7 {
        server
            .register_tool(
                ToolDescriptor::new(format!("t{i}"), json!({ "type": "object" })),
                |_args: Value| async move { Ok::<_, ToolwireError>(CallToolResponse::text("")) },
            )
            .await
            .unwrap();
    }

    let conn = connect_in_process(
        server,
        ConnectOptions {
            page_limits: PageLimits {
                default_page_size: 3,
                max_page_size: 3,
            },
            ..ConnectOptions::default()
        },
    )
    .await;

    // The client walked four server pages to build its catalog.
    assert_eq!(conn.list_tools().await.len(), 7);

    let mut sizes = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = conn
            .list_tools_paginated(cursor.as_deref(), None)
            .await
            .unwrap();
        sizes.push(page.items.len());
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(sizes, vec![3, 3, 1]);

    let bad = conn.list_tools_paginated(Some("not-a-cursor"), None).await;
    assert!(matches!(bad, Err(ToolwireError::Pagination(_))));

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_list_changed_triggers_refresh() {
    let server = slow_server().await;
    let conn = connect_in_process(server.clone(), ConnectOptions::default()).await;
    assert_eq!(conn.list_tools().await.len(), 1);

    server
        .register_tool(
            ToolDescriptor::new("late", json!({ "type": "object" })),
            |_args: Value| async move { Ok::<_, ToolwireError>(CallToolResponse::text("late")) },
        )
        .await
        .unwrap();

    let mut seen = false;
    for _ in 0..100 {
        if conn.registry().get_tool("late").await.is_some() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "registry was not refreshed after list_changed");

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_server_and_client_sessions_close_together() {
    let server_sessions = SessionManager::default();
    let server = McpServer::builder(info())
        .sessions(server_sessions.clone())
        .build()
        .unwrap();
    let client_sessions = SessionManager::default();

    let conn = connect_in_process(
        server,
        ConnectOptions {
            sessions: Some(client_sessions.clone()),
            ..ConnectOptions::default()
        },
    )
    .await;
    let client_id = conn.session_id().unwrap().to_string();

    let server_side = server_sessions.list().await;
    assert_eq!(server_side.len(), 1);
    assert_eq!(server_side[0].state, SessionState::Active);

    conn.disconnect().await.unwrap();
    assert_eq!(
        client_sessions.get(&client_id).await.unwrap().state,
        SessionState::Closed
    );
    drop(conn);

    // The server sees EOF once the client pump shuts its half down.
    let mut removed = false;
    for _ in 0..100 {
        if server_sessions.list().await.is_empty() {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(removed, "server session was not removed after hang-up");
}
