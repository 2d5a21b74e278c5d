//! Command-line interface definition for Toolwire
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for inspecting configured MCP servers, calling
//! their tools, and managing persisted sessions.

use clap::{Parser, Subcommand};

/// Toolwire - MCP tool-invocation client
///
/// Connect to configured MCP servers over stdio, HTTP, WebSocket, or SSE
/// and discover or invoke the tools they expose.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolwire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the per-request deadline in milliseconds
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Override the handshake deadline in milliseconds
    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Toolwire
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configured servers
    Servers,

    /// List or search the tools a server exposes
    Tools {
        /// Server name (defaults to the first configured server)
        #[arg(short, long)]
        server: Option<String>,

        /// Case-insensitive text to match against name, title, and description
        #[arg(short, long)]
        query: Option<String>,

        /// Only tools whose `_meta.category` matches
        #[arg(long)]
        category: Option<String>,

        /// Only tools annotated as read-only
        #[arg(long)]
        read_only: bool,

        /// Page size to request
        #[arg(long)]
        page_size: Option<usize>,

        /// Continue from a cursor returned by a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Print the page as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Invoke a tool
    Call {
        /// Tool name
        tool: String,

        /// Server name (defaults to the first configured server)
        #[arg(short, long)]
        server: Option<String>,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the resources a server exposes
    Resources {
        /// Server name (defaults to the first configured server)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// List the prompts a server exposes
    Prompts {
        /// Server name (defaults to the first configured server)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Manage persisted sessions
    Sessions {
        /// Session subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },
}

/// Persisted session subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List stored sessions
    List,

    /// Show one stored session
    Show {
        /// Session id
        id: String,
    },

    /// Delete a stored session
    Delete {
        /// Session id
        id: String,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            request_timeout_ms: None,
            handshake_timeout_ms: None,
            command: Commands::Servers,
        }
    }
}
