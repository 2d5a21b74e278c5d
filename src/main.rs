//! Toolwire - MCP tool-invocation client
//!
#![doc = "Main entry point for the toolwire command-line client."]

use anyhow::{Context, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolwire::cli::{Cli, Commands};
use toolwire::commands;
use toolwire::config::Config;
use toolwire::mcp::registry::SearchQuery;
use toolwire::storage::SqliteSessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Servers => {
            commands::mcp::list_servers(&config);
            Ok(())
        }
        Commands::Tools {
            server,
            query,
            category,
            read_only,
            page_size,
            cursor,
            json,
        } => {
            let search = SearchQuery {
                query,
                category,
                read_only: read_only.then_some(true),
                page_size,
                cursor,
            };
            commands::mcp::list_tools(&config, server.as_deref(), search, json).await?;
            Ok(())
        }
        Commands::Call {
            tool,
            server,
            args,
            json,
        } => {
            tracing::debug!("Calling tool {}", tool);
            commands::mcp::call_tool(&config, server.as_deref(), &tool, &args, json).await?;
            Ok(())
        }
        Commands::Resources { server } => {
            commands::mcp::list_resources(&config, server.as_deref()).await?;
            Ok(())
        }
        Commands::Prompts { server } => {
            commands::mcp::list_prompts(&config, server.as_deref()).await?;
            Ok(())
        }
        Commands::Sessions { command } => {
            let store = match &config.session.store_path {
                Some(path) => SqliteSessionStore::new_with_path(path.clone()),
                None => SqliteSessionStore::new(),
            }
            .context("Failed to open session store")?;
            commands::sessions::handle_sessions(command, &store).await?;
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "toolwire=debug" } else { "toolwire=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so stdout stays clean for tables and JSON output.
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
