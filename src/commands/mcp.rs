//! Handlers for the server-facing subcommands
//!
//! Each handler connects to one configured server, does its work, and
//! disconnects before returning. When `session.store_path` is set the
//! connection's session is saved after the disconnect.

use crate::config::{Config, ServerEntry};
use crate::error::{Result, ToolwireError};
use crate::mcp::connection::{McpConnection, ToolCallOutcome};
use crate::mcp::registry::SearchQuery;
use crate::mcp::transport::TransportConfig;
use crate::mcp::types::ToolDescriptor;
use crate::session::SessionManager;
use colored::Colorize;
use prettytable::{format, row, Table};
use serde_json::Value;

/// Print the configured servers
pub fn list_servers(config: &Config) {
    if config.servers.is_empty() {
        println!("{}", "No servers configured.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Name".bold(), "Transport".bold(), "Target".bold()]);
    for server in &config.servers {
        table.add_row(row![
            server.name.cyan(),
            server.transport.kind(),
            target(&server.transport)
        ]);
    }

    println!("\nConfigured Servers:");
    table.printstd();
    println!();
}

/// List tools, optionally filtered
pub async fn list_tools(
    config: &Config,
    server: Option<&str>,
    query: SearchQuery,
    json: bool,
) -> Result<()> {
    let (conn, sessions) = open(config, server).await?;
    let result = print_tools(&conn, &query, json).await;
    close(config, &conn, &sessions).await;
    result
}

async fn print_tools(conn: &McpConnection, query: &SearchQuery, json: bool) -> Result<()> {
    if let Some(denial) = conn.catalog_denial() {
        eprintln!("{}", format!("Denied: {}", denial).red());
        return Err(ToolwireError::SecurityDenied(denial.clone()));
    }
    let page = conn.search_tools(query).await?;

    if json {
        let out = serde_json::json!({
            "tools": page.items,
            "nextCursor": page.next_cursor,
            "totalMatching": page.total_matching,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if page.items.is_empty() {
        println!("{}", "No matching tools.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Name".bold(),
        "Description".bold(),
        "Category".bold(),
        "Read-only".bold()
    ]);
    for tool in &page.items {
        table.add_row(tool_row(tool));
    }

    println!(
        "\nTools on {} ({} matching):",
        conn.name().cyan(),
        page.total_matching
    );
    table.printstd();
    if let Some(cursor) = page.next_cursor {
        println!();
        println!("More results: {}", format!("--cursor {}", cursor).cyan());
    }
    println!();
    Ok(())
}

/// Invoke `tool` with `args`, a JSON object
pub async fn call_tool(
    config: &Config,
    server: Option<&str>,
    tool: &str,
    args: &str,
    json: bool,
) -> Result<()> {
    let arguments = parse_arguments(args)?;
    let (conn, sessions) = open(config, server).await?;
    let outcome = conn.call_tool(tool, arguments).await;
    close(config, &conn, &sessions).await;

    match outcome? {
        ToolCallOutcome::Denied(denial) => {
            eprintln!("{}", format!("Denied: {}", denial).red());
            Err(ToolwireError::SecurityDenied(denial))
        }
        ToolCallOutcome::Completed(response) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.is_error == Some(true) {
                eprintln!("{}", response.text_content().red());
            } else {
                println!("{}", response.text_content());
            }
            Ok(())
        }
    }
}

/// List resources
pub async fn list_resources(config: &Config, server: Option<&str>) -> Result<()> {
    let (conn, sessions) = open(config, server).await?;
    let resources = conn.list_resources().await;
    close(config, &conn, &sessions).await;

    if resources.is_empty() {
        println!("{}", "No resources.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["URI".bold(), "Name".bold(), "MIME type".bold()]);
    for r in resources {
        table.add_row(row![
            r.uri.cyan(),
            r.name,
            r.mime_type.unwrap_or_else(|| "-".to_string())
        ]);
    }
    table.printstd();
    Ok(())
}

/// List prompts
pub async fn list_prompts(config: &Config, server: Option<&str>) -> Result<()> {
    let (conn, sessions) = open(config, server).await?;
    let prompts = conn.list_prompts().await;
    close(config, &conn, &sessions).await;

    if prompts.is_empty() {
        println!("{}", "No prompts.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Name".bold(), "Arguments".bold(), "Description".bold()]);
    for p in prompts {
        let args = p
            .arguments
            .unwrap_or_default()
            .into_iter()
            .map(|a| {
                if a.required == Some(true) {
                    a.name
                } else {
                    format!("[{}]", a.name)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        table.add_row(row![
            p.name.cyan(),
            args,
            truncate(p.description.as_deref().unwrap_or("-"), 60)
        ]);
    }
    table.printstd();
    Ok(())
}

async fn open(config: &Config, server: Option<&str>) -> Result<(McpConnection, SessionManager)> {
    let entry = config.server(server)?;
    let sessions = config.session_manager()?;
    let conn = connect(config, entry, sessions.clone()).await?;
    Ok((conn, sessions))
}

async fn close(config: &Config, conn: &McpConnection, sessions: &SessionManager) {
    if let Err(e) = conn.disconnect().await {
        tracing::warn!(server = conn.name(), error = %e, "disconnect failed");
    }
    if config.session.store_path.is_none() {
        return;
    }
    if let Some(id) = conn.session_id() {
        if let Err(e) = sessions.save(id).await {
            tracing::warn!(session_id = id, error = %e, "failed to persist session");
        }
    }
}

async fn connect(
    config: &Config,
    entry: &ServerEntry,
    sessions: SessionManager,
) -> Result<McpConnection> {
    let options = config.connect_options(entry, Some(sessions))?;
    tracing::info!(server = %entry.name, transport = entry.transport.kind(), "connecting");
    McpConnection::connect(entry.name.clone(), &entry.transport, options).await
}

fn parse_arguments(args: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(args)
        .map_err(|e| ToolwireError::Config(format!("--args is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(ToolwireError::Config(
            "--args must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

fn tool_row(tool: &ToolDescriptor) -> prettytable::Row {
    let description = tool
        .title
        .as_deref()
        .or(tool.description.as_deref())
        .unwrap_or("-");
    let read_only = if tool.hints().read_only { "yes" } else { "no" };
    row![
        tool.name.cyan(),
        truncate(description, 60),
        tool.category().unwrap_or("-"),
        read_only
    ]
}

fn target(transport: &TransportConfig) -> String {
    match transport {
        TransportConfig::Stdio { command, args, .. } => {
            let mut parts = vec![command.display().to_string()];
            parts.extend(args.iter().cloned());
            parts.join(" ")
        }
        TransportConfig::Http { url, .. }
        | TransportConfig::Socket { url, .. }
        | TransportConfig::Stream { url, .. } => url.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
