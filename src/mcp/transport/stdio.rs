//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process and communicates with it over
//! its stdin/stdout pipes using newline-delimited JSON framing.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped, blank lines skipped).
//! - The child's stderr is forwarded to a diagnostic stream and logged via
//!   `tracing::debug!`. It is never treated as an error condition.
//!
//! # Lifecycle
//!
//! Three background Tokio tasks are started by [`StdioTransport::spawn`]:
//! a stdin writer, a stdout reader, and a stderr reader. [`Transport::close`]
//! kills and reaps the child. When the transport is dropped without being
//! closed, a best-effort SIGTERM (Unix) or `start_kill` (non-Unix) is sent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, ToolwireError};
use crate::mcp::transport::{channel_stream, connect_error, Transport};

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use toolwire::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> toolwire::error::Result<()> {
/// let transport = StdioTransport::spawn(
///     "npx".into(),
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     HashMap::new(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Sender side of the stdin channel; `send()` writes here.
    stdin_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver for stdout lines (one JSON message per line).
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Shared receiver for stderr lines (diagnostics only).
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Handle to the spawned child process.
    child: Arc<Mutex<Child>>,
    /// Executable name, for error messages.
    executable: PathBuf,
}

impl StdioTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// The child's environment is cleared, then `PATH` is carried over from
    /// this process and the caller-supplied `env` map is applied on top.
    ///
    /// # Arguments
    ///
    /// * `executable` - Path to the server executable.
    /// * `args` - Command-line arguments passed to the executable.
    /// * `env` - Environment variables for the child process.
    /// * `working_dir` - Optional working directory for the child process.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the process cannot be
    /// spawned or if the stdio pipes are unavailable.
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(&env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let target = executable.display().to_string();
        let mut child = cmd
            .spawn()
            .map_err(|e| connect_error("stdio", &target, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connect_error("stdio", &target, "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connect_error("stdio", &target, "child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| connect_error("stdio", &target, "child stderr unavailable"))?;

        tracing::debug!(executable = %target, pid = ?child.id(), "spawned MCP server");

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "toolwire::mcp::transport::stdio",
                    "mcp server stderr: {}",
                    line
                );
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
            executable,
        })
    }

    /// OS process id of the child, while it is still running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }

    /// Exit status of the child if it has exited, without waiting.
    pub async fn try_exit_status(&self) -> Option<ExitStatus> {
        self.child.lock().await.try_wait().ok().flatten()
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Enqueue a message for the background stdin writer.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Connection`] if the writer task has exited.
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx.send(message).map_err(|_| {
            ToolwireError::Connection(format!(
                "stdin of `{}` is closed",
                self.executable.display()
            ))
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stdout_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stderr_rx))
    }

    /// Kill the child and wait for it to be reaped.
    async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(?status, "MCP server already exited");
            return Ok(());
        }
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "failed to kill MCP server");
        }
        Ok(())
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    ///
    /// MUST NOT block. If the child lock is contended the kill is skipped.
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }
    }
}
