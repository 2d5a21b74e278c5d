//! Error types for Toolwire
//!
//! This module defines the error taxonomy shared by the transports, the
//! JSON-RPC client, the registry, sessions, and the server, using `thiserror`
//! for ergonomic error handling.
//!
//! Every variant that can cross the wire has a JSON-RPC code (see
//! [`ToolwireError::rpc_code`]) and the client side maps inbound error
//! objects back onto the taxonomy with [`ToolwireError::from_rpc`].

use serde_json::{json, Value};
use thiserror::Error;

use crate::mcp::types::{
    JsonRpcError, INTERNAL_ERROR, INVALID_PARAMS, METHOD_TOOLS_CALL, SECURITY_DENIED,
    SESSION_EXPIRED,
};
use crate::security::Denial;
use crate::session::{SessionState, SessionTrigger};

/// `data.reason` value attached to `-32602` errors caused by a bad cursor.
pub const REASON_INVALID_CURSOR: &str = "invalid_cursor";

/// `data.reason` value attached to `-32602` errors caused by an unknown tool.
pub const REASON_TOOL_NOT_FOUND: &str = "tool_not_found";

/// Main error type for Toolwire operations
#[derive(Error, Debug)]
pub enum ToolwireError {
    /// A transport could not be established, or it was torn down while
    /// requests were still in flight.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer returned a JSON-RPC error object that does not map onto a
    /// more specific variant, or sent something that is not valid protocol.
    #[error("Protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code
        code: i64,
        /// Human-readable message from the peer
        message: String,
        /// Optional structured error data
        data: Option<Value>,
    },

    /// No tool with this name exists in the catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool handler ran and failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// A security policy rejected the call
    #[error("Security denied: {0}")]
    SecurityDenied(Denial),

    /// The session is suspended or closed and cannot serve requests
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// No session with this id exists
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session state transition that the transition table does not allow
    #[error("Invalid session transition: cannot {trigger} from {from}")]
    InvalidTransition {
        /// State the session was in
        from: SessionState,
        /// Trigger that was rejected
        trigger: SessionTrigger,
    },

    /// A pagination cursor was malformed, tampered with, or expired
    #[error("Pagination error: {0}")]
    Pagination(String),

    /// A request did not receive a response before its deadline
    #[error("Request '{method}' timed out after {elapsed_ms} ms")]
    Timeout {
        /// Method of the request that timed out
        method: String,
        /// Milliseconds waited before giving up
        elapsed_ms: u64,
    },

    /// The remote endpoint rejected our credentials (e.g., 401 Unauthorized)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Toolwire operations
pub type Result<T> = std::result::Result<T, ToolwireError>;

impl ToolwireError {
    /// JSON-RPC error code used when this error is reported to a peer.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolwire::error::ToolwireError;
    ///
    /// let err = ToolwireError::Pagination("expired".into());
    /// assert_eq!(err.rpc_code(), -32602);
    /// ```
    pub fn rpc_code(&self) -> i64 {
        match self {
            ToolwireError::Protocol { code, .. } => *code,
            ToolwireError::ToolNotFound(_) | ToolwireError::Pagination(_) => INVALID_PARAMS,
            ToolwireError::SecurityDenied(_) => SECURITY_DENIED,
            ToolwireError::SessionExpired(_) | ToolwireError::SessionNotFound(_) => {
                SESSION_EXPIRED
            }
            _ => INTERNAL_ERROR,
        }
    }

    /// Convert this error into the JSON-RPC error object sent on the wire.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let data = match self {
            ToolwireError::Protocol { data, .. } => data.clone(),
            ToolwireError::ToolNotFound(name) => {
                Some(json!({ "reason": REASON_TOOL_NOT_FOUND, "name": name }))
            }
            ToolwireError::Pagination(_) => Some(json!({ "reason": REASON_INVALID_CURSOR })),
            ToolwireError::SecurityDenied(denial) => serde_json::to_value(denial).ok(),
            _ => None,
        };
        let message = match self {
            ToolwireError::Protocol { message, .. } => message.clone(),
            other => other.to_string(),
        };
        JsonRpcError {
            code: self.rpc_code(),
            message,
            data,
        }
    }

    /// Map a JSON-RPC error object received for `method` onto the taxonomy.
    ///
    /// Codes without a more specific meaning become [`ToolwireError::Protocol`].
    ///
    /// # Examples
    ///
    /// ```
    /// use toolwire::error::ToolwireError;
    /// use toolwire::mcp::types::JsonRpcError;
    ///
    /// let rpc = JsonRpcError {
    ///     code: -32602,
    ///     message: "bad cursor".to_string(),
    ///     data: Some(serde_json::json!({ "reason": "invalid_cursor" })),
    /// };
    /// let err = ToolwireError::from_rpc(rpc, "tools/list");
    /// assert!(matches!(err, ToolwireError::Pagination(_)));
    /// ```
    pub fn from_rpc(error: JsonRpcError, method: &str) -> Self {
        let reason = error
            .data
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match (error.code, reason.as_deref()) {
            (INVALID_PARAMS, Some(REASON_INVALID_CURSOR)) => {
                ToolwireError::Pagination(error.message)
            }
            (INVALID_PARAMS, Some(REASON_TOOL_NOT_FOUND)) => {
                let name = error
                    .data
                    .as_ref()
                    .and_then(|d| d.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(error.message);
                ToolwireError::ToolNotFound(name)
            }
            (SECURITY_DENIED, _) => match error
                .data
                .clone()
                .and_then(|d| serde_json::from_value::<Denial>(d).ok())
            {
                Some(denial) => ToolwireError::SecurityDenied(denial),
                None => ToolwireError::Protocol {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                },
            },
            (SESSION_EXPIRED, _) => ToolwireError::SessionExpired(error.message),
            (INTERNAL_ERROR, _) if method == METHOD_TOOLS_CALL => {
                ToolwireError::ToolExecution(error.message)
            }
            _ => ToolwireError::Protocol {
                code: error.code,
                message: error.message,
                data: error.data,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::DenialReason;

    #[test]
    fn test_config_error_display() {
        let error = ToolwireError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_timeout_error_display() {
        let error = ToolwireError::Timeout {
            method: "tools/call".to_string(),
            elapsed_ms: 1500,
        };
        assert_eq!(
            error.to_string(),
            "Request 'tools/call' timed out after 1500 ms"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = ToolwireError::InvalidTransition {
            from: SessionState::Closed,
            trigger: SessionTrigger::Resume,
        };
        assert_eq!(
            error.to_string(),
            "Invalid session transition: cannot resume from closed"
        );
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(ToolwireError::Pagination("x".into()).rpc_code(), -32602);
        assert_eq!(ToolwireError::ToolNotFound("x".into()).rpc_code(), -32602);
        assert_eq!(ToolwireError::ToolExecution("x".into()).rpc_code(), -32603);
        assert_eq!(ToolwireError::SessionExpired("x".into()).rpc_code(), -32003);
        let denial = Denial::new("api-key", DenialReason::Unauthenticated, "no key");
        assert_eq!(ToolwireError::SecurityDenied(denial).rpc_code(), -32001);
    }

    #[test]
    fn test_pagination_round_trips_through_rpc_error() {
        let rpc = ToolwireError::Pagination("cursor expired".into()).to_rpc_error();
        assert_eq!(rpc.code, -32602);
        assert_eq!(rpc.data.as_ref().unwrap()["reason"], "invalid_cursor");

        let back = ToolwireError::from_rpc(rpc, "tools/list");
        assert!(matches!(back, ToolwireError::Pagination(_)));
    }

    #[test]
    fn test_tool_not_found_keeps_name() {
        let rpc = ToolwireError::ToolNotFound("missing".into()).to_rpc_error();
        match ToolwireError::from_rpc(rpc, "tools/call") {
            ToolwireError::ToolNotFound(name) => assert_eq!(name, "missing"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_security_denial_survives_wire() {
        let denial = Denial::new(
            "rate-limit",
            DenialReason::RateLimited { retry_after_ms: 250 },
            "too many calls",
        );
        let rpc = ToolwireError::SecurityDenied(denial.clone()).to_rpc_error();
        assert_eq!(rpc.data.as_ref().unwrap()["reason"], "rate_limited");

        match ToolwireError::from_rpc(rpc, "tools/call") {
            ToolwireError::SecurityDenied(back) => assert_eq!(back, denial),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_internal_error_on_tool_call_is_execution_failure() {
        let rpc = JsonRpcError {
            code: -32603,
            message: "handler panicked".into(),
            data: None,
        };
        assert!(matches!(
            ToolwireError::from_rpc(rpc.clone(), "tools/call"),
            ToolwireError::ToolExecution(_)
        ));
        assert!(matches!(
            ToolwireError::from_rpc(rpc, "tools/list"),
            ToolwireError::Protocol { code: -32603, .. }
        ));
    }

    #[test]
    fn test_unknown_code_becomes_protocol_error() {
        let rpc = JsonRpcError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert!(matches!(
            ToolwireError::from_rpc(rpc, "sampling/createMessage"),
            ToolwireError::Protocol { code: -32601, .. }
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ToolwireError = io_error.into();
        assert!(matches!(error, ToolwireError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ToolwireError = json_error.into();
        assert!(matches!(error, ToolwireError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ToolwireError>();
    }
}
