//! MCP test server binary for integration tests
//!
//! Serves an [`McpServer`] over stdin/stdout using newline-delimited JSON.
//! Integration tests spawn it through `CARGO_BIN_EXE_mcp_test_server` to
//! exercise the stdio transport against a real child process.
//!
//! # Tools
//!
//! - `echo` -- returns the `text` argument (read-only, category `util`)
//! - `add` -- returns `a + b` as text and structured content (category `math`)
//! - `fail` -- always fails with a tool execution error
//!
//! One resource (`test://readme`) and one prompt (`greet`) are also exposed.
//!
//! # Flags
//!
//! - `--hang` -- read stdin forever and never answer, not even `initialize`
//! - `--api-key <KEY>` -- require `KEY` as `_meta.apiKey` on every request

use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use toolwire::mcp::server::McpServer;
use toolwire::mcp::types::{
    CallToolResponse, ContentBlock, Implementation, PromptArgument, PromptDescriptor,
    PromptMessage, ResourceContents, ResourceDescriptor, Role, TextResourceContents,
    ToolAnnotations, ToolDescriptor,
};
use toolwire::security::{ApiKeyPolicy, SecurityPolicyEngine};
use toolwire::ToolwireError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--hang") {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while lines.next_line().await?.is_some() {}
        return Ok(());
    }

    let mut builder = McpServer::builder(Implementation {
        name: "mcp-test-server".to_string(),
        version: "0.1.0".to_string(),
        description: None,
    })
    .instructions("Test server for toolwire integration tests");

    if let Some(pos) = args.iter().position(|a| a == "--api-key") {
        if let Some(key) = args.get(pos + 1) {
            builder = builder.security(SecurityPolicyEngine::new(std::sync::Arc::new(
                ApiKeyPolicy::new([key.as_str()]),
            )));
        }
    }

    let server = builder.build()?;
    register(&server).await?;
    server.serve_stdio().await?;
    Ok(())
}

async fn register(server: &McpServer) -> toolwire::Result<()> {
    server
        .register_tool(
            ToolDescriptor::new(
                "echo",
                json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            )
            .with_description("Echo the text argument back")
            .with_category("util")
            .with_annotations(ToolAnnotations {
                read_only_hint: Some(true),
                ..ToolAnnotations::default()
            }),
            |args: Value| async move {
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok::<_, ToolwireError>(CallToolResponse::text(text))
            },
        )
        .await?;

    server
        .register_tool(
            ToolDescriptor::new(
                "add",
                json!({
                    "type": "object",
                    "properties": {
                        "a": { "type": "number" },
                        "b": { "type": "number" }
                    },
                    "required": ["a", "b"]
                }),
            )
            .with_description("Add two numbers")
            .with_category("math"),
            |args: Value| async move {
                let a = args.get("a").and_then(Value::as_f64);
                let b = args.get("b").and_then(Value::as_f64);
                match (a, b) {
                    (Some(a), Some(b)) => {
                        let mut resp = CallToolResponse::text((a + b).to_string());
                        resp.structured_content = Some(json!({ "sum": a + b }));
                        Ok(resp)
                    }
                    _ => Err(ToolwireError::ToolExecution(
                        "a and b must be numbers".to_string(),
                    )),
                }
            },
        )
        .await?;

    server
        .register_tool(
            ToolDescriptor::new("fail", json!({ "type": "object" }))
                .with_description("Always fails"),
            |_args: Value| async move {
                Err::<CallToolResponse, _>(ToolwireError::ToolExecution(
                    "intentional failure".to_string(),
                ))
            },
        )
        .await?;

    server
        .register_resource(
            ResourceDescriptor {
                uri: "test://readme".to_string(),
                name: "readme".to_string(),
                title: None,
                description: Some("A short text resource".to_string()),
                mime_type: Some("text/plain".to_string()),
            },
            ResourceContents::Text(TextResourceContents {
                uri: "test://readme".to_string(),
                mime_type: Some("text/plain".to_string()),
                text: "hello from the test server".to_string(),
            }),
        )
        .await;

    server
        .register_prompt(
            PromptDescriptor {
                name: "greet".to_string(),
                title: None,
                description: Some("Greet someone by name".to_string()),
                arguments: Some(vec![PromptArgument {
                    name: "name".to_string(),
                    description: None,
                    required: Some(true),
                }]),
            },
            vec![PromptMessage {
                role: Role::User,
                content: ContentBlock::Text {
                    text: "Say hello to {{name}}".to_string(),
                },
            }],
        )
        .await;

    Ok(())
}
