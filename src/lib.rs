//! Toolwire - MCP tool-invocation protocol core
//!
//! This library lets an agent process discover and invoke the tools,
//! resources, and prompts exposed by a separate process or remote service
//! over the Model Context Protocol (JSON-RPC 2.0), and gates every call
//! through a session lifecycle and a security policy.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: transports, the JSON-RPC client, the typed protocol wrapper,
//!   the tool registry with cursor pagination, the server side, and
//!   [`McpConnection`], which composes all of it
//! - `session`: session records, the state machine, TTL suspension, and
//!   hierarchy
//! - `storage`: session persistence (SQLite and in-memory)
//! - `security`: API-key, rate-limit, and composite policies
//! - `metrics`: request and denial counters
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: the `toolwire` command-line front end
//!
//! # Example
//!
//! ```no_run
//! use toolwire::{Config, McpConnection};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let entry = config.server(None)?;
//!     let options = config.connect_options(entry, None)?;
//!     let conn = McpConnection::connect(entry.name.clone(), &entry.transport, options).await?;
//!     for tool in conn.list_tools().await {
//!         println!("{}", tool.name);
//!     }
//!     conn.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod metrics;
pub mod security;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, ToolwireError};
pub use mcp::connection::{ConnectOptions, McpConnection, ToolCallOutcome};
pub use mcp::server::McpServer;
pub use security::{Decision, Denial, SecurityPolicyEngine};
pub use session::{Session, SessionManager, SessionState};
