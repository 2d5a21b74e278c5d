//! Config-driven connection tests
//!
//! Loads a YAML file from disk, builds connection options from it, and
//! connects to the `mcp_test_server` binary with them.

mod common;

use clap::Parser;
use serde_json::json;
use serial_test::serial;

use toolwire::cli::Cli;
use toolwire::mcp::connection::{McpConnection, ToolCallOutcome};
use toolwire::storage::{SessionStore, SqliteSessionStore};
use toolwire::{Config, ToolwireError};

use common::{temp_config_file, test_server_exe};

fn cli() -> Cli {
    Cli::try_parse_from(["toolwire", "servers"]).unwrap()
}

fn yaml_for_test_server(server_args: &str, api_key: &str, store_path: &str) -> String {
    format!(
        r#"
client:
  name: config-test
  handshake_timeout_ms: 5000
servers:
  - name: local
    transport:
      type: stdio
      command: "{exe}"
      args: {server_args}
    api_key: {api_key}
registry:
  default_page_size: 2
  max_page_size: 2
  cursor_secret: shared
session:
  store_path: "{store_path}"
"#,
        exe = test_server_exe().display(),
    )
}

#[tokio::test]
#[serial]
async fn test_connect_from_config_file_and_persist_session() {
    let store_dir = tempfile::tempdir().unwrap();
    let db_path = store_dir.path().join("sessions.db");
    let yaml = yaml_for_test_server(
        r#"["--api-key", "from-config"]"#,
        "from-config",
        &db_path.display().to_string(),
    );
    let (_dir, path) = temp_config_file(&yaml);

    let config = Config::load(path.to_str().unwrap(), &cli()).unwrap();
    config.validate().unwrap();

    let entry = config.server(None).unwrap();
    assert_eq!(entry.name, "local");
    let sessions = config.session_manager().unwrap();
    let options = config
        .connect_options(entry, Some(sessions.clone()))
        .unwrap();

    let conn = McpConnection::connect(&entry.name, &entry.transport, options)
        .await
        .unwrap();

    // Page size 2 over three tools.
    let first = conn.list_tools_paginated(None, None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.next_cursor.is_some());

    let echo = conn
        .call_tool("echo", json!({ "text": "configured" }))
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(echo.text_content(), "configured");

    let id = conn.session_id().unwrap().to_string();
    sessions.save(&id).await.unwrap();
    conn.disconnect().await.unwrap();

    let reopened = SqliteSessionStore::new_with_path(db_path.clone()).unwrap();
    let summaries = reopened.list().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, id);
    assert_eq!(summaries[0].message_count, 1);
}

#[tokio::test]
#[serial]
async fn test_wrong_api_key_in_config_is_denied() {
    let store_dir = tempfile::tempdir().unwrap();
    let yaml = yaml_for_test_server(
        r#"["--api-key", "expected"]"#,
        "something-else",
        &store_dir.path().join("sessions.db").display().to_string(),
    );
    let (_dir, path) = temp_config_file(&yaml);

    let config = Config::load(path.to_str().unwrap(), &cli()).unwrap();
    let entry = config.server(Some("local")).unwrap();
    let options = config.connect_options(entry, None).unwrap();

    let conn = McpConnection::connect(&entry.name, &entry.transport, options)
        .await
        .unwrap();
    let refused = conn.catalog_denial().unwrap();
    assert_eq!(refused.policy, "api-key");
    let outcome = conn.call_tool("echo", json!({ "text": "x" })).await.unwrap();
    assert!(matches!(outcome, ToolCallOutcome::Denied(_)));
    conn.disconnect().await.unwrap();
}

#[test]
#[serial]
fn test_invalid_file_is_config_error() {
    let (_dir, path) = temp_config_file("client: [this is not a mapping");
    let result = Config::load(path.to_str().unwrap(), &cli());
    assert!(matches!(result, Err(ToolwireError::Config(_))));
}

#[test]
#[serial]
fn test_validation_rejects_zero_rate_limit() {
    let (_dir, path) = temp_config_file(
        r#"
security:
  policy: { type: rate-limit, count: 0, window_ms: 1000 }
"#,
    );
    let config = Config::load(path.to_str().unwrap(), &cli()).unwrap();
    assert!(matches!(config.validate(), Err(ToolwireError::Config(_))));
}
