//! Streamable-HTTP host for [`McpServer`]
//!
//! `POST /mcp` carries one JSON-RPC message per request. `initialize` opens
//! a connection and the response carries its id in `MCP-Session-Id`; every
//! later request must echo that header. `DELETE /mcp` closes the session.
//!
//! Credentials come from `X-API-Key` or `Authorization: Bearer`. Rate limits
//! key on the credential fingerprint; `X-Caller-Id` only names callers that
//! present no credential.
//!
//! Connections idle for longer than the idle TTL, or already closed, are
//! evicted whenever a new one is opened.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Result, ToolwireError};
use crate::mcp::server::{ConnectionPhase, McpServer, PeerIdentity, ServerConnection};
use crate::mcp::types::{
    JsonRpcError, JsonRpcResponse, INVALID_REQUEST, METHOD_INITIALIZE, PARSE_ERROR,
};

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

struct HttpConnection {
    conn: Arc<ServerConnection>,
    last_seen: Instant,
}

#[derive(Clone)]
struct HttpState {
    server: McpServer,
    connections: Arc<Mutex<HashMap<String, HttpConnection>>>,
    idle_ttl: Duration,
}

impl HttpState {
    /// Drop connections that are closed or idle past the TTL, closing
    /// their sessions.
    async fn evict_stale(&self) {
        let mut stale = Vec::new();
        {
            let mut connections = self.connections.lock().await;
            let mut expired = Vec::new();
            for (sid, entry) in connections.iter() {
                if entry.last_seen.elapsed() > self.idle_ttl
                    || entry.conn.phase().await == ConnectionPhase::Closed
                {
                    expired.push(sid.clone());
                }
            }
            for sid in expired {
                if let Some(entry) = connections.remove(&sid) {
                    stale.push((sid, entry.conn));
                }
            }
        }
        for (sid, conn) in stale {
            tracing::debug!(session = %sid, "evicting idle http connection");
            self.server.close_connection(&conn).await;
        }
    }

    /// Look up `sid` and record activity on it.
    async fn touch(&self, sid: &str) -> Option<Arc<ServerConnection>> {
        let mut connections = self.connections.lock().await;
        let entry = connections.get_mut(sid)?;
        if entry.last_seen.elapsed() > self.idle_ttl {
            return None;
        }
        entry.last_seen = Instant::now();
        Some(Arc::clone(&entry.conn))
    }
}

/// Router serving `server` at `/mcp`, evicting connections idle for longer
/// than the server's session TTL.
pub fn router(server: McpServer) -> Router {
    let idle_ttl = server.sessions().default_ttl();
    router_with_idle_ttl(server, idle_ttl)
}

/// Router serving `server` at `/mcp` with an explicit idle TTL.
pub fn router_with_idle_ttl(server: McpServer, idle_ttl: Duration) -> Router {
    let state = HttpState {
        server,
        connections: Arc::new(Mutex::new(HashMap::new())),
        idle_ttl,
    };
    Router::new()
        .route("/mcp", post(http_post).delete(http_delete).get(http_get))
        .with_state(state)
}

/// Bind `addr` and serve until the listener fails.
///
/// # Errors
///
/// Returns [`ToolwireError::Io`] if the address cannot be bound.
pub async fn serve(server: McpServer, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "serving MCP over HTTP at /mcp");
    axum::serve(listener, router(server))
        .await
        .map_err(|e| ToolwireError::Connection(format!("http host failed: {e}")))
}

async fn http_get() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, "server-initiated stream not offered")
}

async fn http_delete(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(sid) = header_str(&headers, SESSION_HEADER) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
    };
    let removed = st.connections.lock().await.remove(sid);
    match removed {
        Some(entry) => {
            st.server.close_connection(&entry.conn).await;
            StatusCode::NO_CONTENT.into_response()
        }
        None => (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response(),
    }
}

async fn http_post(State(st): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return jsonrpc_response(
                JsonRpcResponse::failure(
                    None,
                    JsonRpcError {
                        code: PARSE_ERROR,
                        message: "parse error".to_string(),
                        data: Some(json!({ "detail": e.to_string() })),
                    },
                ),
                None,
            )
        }
    };
    if message.is_array() {
        return jsonrpc_response(
            JsonRpcResponse::failure(
                None,
                JsonRpcError::new(INVALID_REQUEST, "batching not supported"),
            ),
            None,
        );
    }

    let identity = identity_from(&headers);

    if message.get("method").and_then(Value::as_str) == Some(METHOD_INITIALIZE) {
        st.evict_stale().await;
        let conn = Arc::new(ServerConnection::new(identity));
        let Some(resp) = st.server.handle_message(&conn, message).await else {
            return StatusCode::ACCEPTED.into_response();
        };
        let sid = match (&resp.error, conn.session_id().await) {
            (None, Some(sid)) => {
                let entry = HttpConnection {
                    conn,
                    last_seen: Instant::now(),
                };
                st.connections.lock().await.insert(sid.clone(), entry);
                Some(sid)
            }
            _ => None,
        };
        return jsonrpc_response(resp, sid.as_deref());
    }

    let Some(sid) = header_str(&headers, SESSION_HEADER) else {
        return (StatusCode::BAD_REQUEST, "missing mcp-session-id").into_response();
    };
    let Some(conn) = st.touch(sid).await else {
        return (StatusCode::NOT_FOUND, "unknown mcp-session-id").into_response();
    };
    conn.set_credential(identity.credential).await;

    match st.server.handle_message(&conn, message).await {
        Some(resp) => jsonrpc_response(resp, Some(sid)),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn identity_from(headers: &HeaderMap) -> PeerIdentity {
    let credential = header_str(headers, "x-api-key")
        .map(str::to_string)
        .or_else(|| {
            header_str(headers, "authorization")
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
        })
        .filter(|c| !c.is_empty());
    PeerIdentity {
        caller: header_str(headers, "x-caller-id").map(str::to_string),
        credential,
    }
}

fn jsonrpc_response(resp: JsonRpcResponse, session_id: Option<&str>) -> Response {
    let body = serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string());
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json");
    if let Some(sid) = session_id {
        if let Ok(v) = HeaderValue::from_str(sid) {
            builder = builder.header(SESSION_HEADER, v);
        }
    }
    builder
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::server::tests::demo_server;
    use crate::mcp::types::{LATEST_PROTOCOL_VERSION, SECURITY_DENIED};
    use crate::security::{
        credential_fingerprint, ApiKeyPolicy, CompositePolicy, RateLimitPolicy,
        SecurityPolicyEngine,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn post(body: Value, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn initialize() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "http-test", "version": "1" }
            }
        })
    }

    fn echo_call(id: u64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "x"}}
        })
    }

    async fn open_session(app: &Router, headers: &[(&str, &str)]) -> String {
        let resp = app.clone().oneshot(post(initialize(), headers)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let sid = resp.headers()[SESSION_HEADER].to_str().unwrap().to_string();

        let mut with_sid = headers.to_vec();
        with_sid.push((SESSION_HEADER, sid.as_str()));
        let ack = app
            .clone()
            .oneshot(post(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                &with_sid,
            ))
            .await
            .unwrap();
        assert_eq!(ack.status(), StatusCode::ACCEPTED);
        sid
    }

    #[tokio::test]
    async fn test_session_header_lifecycle() {
        let server = demo_server(SecurityPolicyEngine::allow_all()).await;
        let app = router(server);
        let sid = open_session(&app, &[]).await;

        let list = app
            .clone()
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
                &[(SESSION_HEADER, sid.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        assert_eq!(json_body(list).await["result"]["tools"][0]["name"], "echo");

        let missing = app
            .clone()
            .oneshot(post(json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}), &[]))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let delete = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_HEADER, sid.as_str())
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(delete).await.unwrap().status(),
            StatusCode::NO_CONTENT
        );

        let gone = app
            .clone()
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}),
                &[(SESSION_HEADER, sid.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bearer_and_api_key_headers() {
        let engine = SecurityPolicyEngine::new(Arc::new(ApiKeyPolicy::new(["secret"])));
        let app = router(demo_server(engine).await);

        let sid = open_session(&app, &[("authorization", "Bearer secret")]).await;
        let ok = app
            .clone()
            .oneshot(post(echo_call(2), &[(SESSION_HEADER, sid.as_str())]))
            .await
            .unwrap();
        assert!(json_body(ok).await.get("error").is_none());

        let sid = open_session(&app, &[]).await;
        let denied = app
            .clone()
            .oneshot(post(
                echo_call(3),
                &[(SESSION_HEADER, sid.as_str()), ("x-api-key", "wrong")],
            ))
            .await
            .unwrap();
        assert_eq!(json_body(denied).await["error"]["code"], SECURITY_DENIED);
    }

    #[tokio::test]
    async fn test_parse_error_and_batch() {
        let app = router(demo_server(SecurityPolicyEngine::allow_all()).await);
        let bad = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("{nope"))
            .unwrap();
        let resp = app.clone().oneshot(bad).await.unwrap();
        assert_eq!(json_body(resp).await["error"]["code"], PARSE_ERROR);

        let batch = app.clone().oneshot(post(json!([initialize()]), &[])).await.unwrap();
        assert_eq!(json_body(batch).await["error"]["code"], INVALID_REQUEST);
    }

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok"));
        headers.insert("x-caller-id", HeaderValue::from_static("agent-7"));
        let id = identity_from(&headers);
        assert_eq!(id.credential.as_deref(), Some("tok"));
        assert_eq!(id.caller.as_deref(), Some("agent-7"));
        assert_eq!(id.caller_key(), credential_fingerprint("tok"));

        let mut anonymous = HeaderMap::new();
        anonymous.insert("x-caller-id", HeaderValue::from_static("agent-7"));
        assert_eq!(identity_from(&anonymous).caller_key(), "agent-7");
    }

    #[tokio::test]
    async fn test_rotating_caller_id_shares_the_credential_budget() {
        let engine = SecurityPolicyEngine::new(Arc::new(CompositePolicy::new(vec![
            Arc::new(ApiKeyPolicy::new(["k1"])),
            Arc::new(RateLimitPolicy::new(1, Duration::from_secs(60))),
        ])));
        let app = router(demo_server(engine).await);

        let first = open_session(&app, &[("x-api-key", "k1"), ("x-caller-id", "a")]).await;
        let ok = app
            .clone()
            .oneshot(post(
                echo_call(2),
                &[(SESSION_HEADER, first.as_str()), ("x-api-key", "k1"), ("x-caller-id", "a")],
            ))
            .await
            .unwrap();
        assert!(json_body(ok).await.get("error").is_none());

        let second = open_session(&app, &[("x-api-key", "k1"), ("x-caller-id", "b")]).await;
        let limited = app
            .clone()
            .oneshot(post(
                echo_call(3),
                &[(SESSION_HEADER, second.as_str()), ("x-api-key", "k1"), ("x-caller-id", "b")],
            ))
            .await
            .unwrap();
        let body = json_body(limited).await;
        assert_eq!(body["error"]["code"], SECURITY_DENIED);
        assert_eq!(body["error"]["data"]["reason"], "rate_limited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connections_are_evicted() {
        let server = demo_server(SecurityPolicyEngine::allow_all()).await;
        let app = router_with_idle_ttl(server.clone(), Duration::from_secs(5));

        let stale = open_session(&app, &[]).await;
        assert_eq!(server.sessions().list().await.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = open_session(&app, &[]).await;

        let sessions = server.sessions().list().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, fresh);

        let gone = app
            .clone()
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
                &[(SESSION_HEADER, stale.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }
}
