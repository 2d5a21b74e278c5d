//! MCP (Model Context Protocol) client and server
//!
//! Targets protocol revision **2025-11-25** with **2025-03-26** accepted as
//! a fallback.
//!
//! # Module Layout
//!
//! - `types`      -- protocol types and JSON-RPC primitives
//! - `transport`  -- `Transport` trait and the stdio, HTTP, WebSocket, SSE
//!   stream, and fake implementations
//! - `client`     -- transport-agnostic JSON-RPC 2.0 client with a pending
//!   request arena
//! - `protocol`   -- typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `cursor`     -- signed pagination cursors
//! - `registry`   -- cached catalogs, pagination, and search
//! - `connection` -- one live client connection to a server
//! - `server`     -- the listening side, with line and HTTP hosts

pub mod client;
pub mod connection;
pub mod cursor;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;

pub use types::*;
