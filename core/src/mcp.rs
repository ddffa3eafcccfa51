//! Client for knowledge servers that speak the tool protocol over stdio.
//!
//! The server runs as a child process. One background task reads its stdout
//! and routes each response to the request waiting on that id; server pings
//! are answered from the same task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;
use crate::registry::{Tool, ToolError, ToolOutput};
use crate::rpc::{
    error_codes, CallToolResult, Incoming, ListToolsResult, RemoteToolInfo, RpcError, RpcRequest,
    RpcResponse, PROTOCOL_VERSION,
};

/// Upper bound on `tools/list` pages, in case a server keeps returning a cursor.
const MAX_LIST_PAGES: usize = 32;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("'{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("server closed the connection")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<RpcError> for McpError {
    fn from(err: RpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// Live, initialized connection to one knowledge server.
pub struct McpClient {
    name: String,
    writer: Writer,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
    /// Cleared by the reader task once the server's output ends.
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    /// Owns the child process when we spawned it; aborting it kills the child.
    supervisor: Option<JoinHandle<()>>,
}

impl McpClient {
    /// Launch the configured server and complete the handshake.
    pub async fn spawn(config: &McpServerConfig) -> Result<Self, McpError> {
        info!(
            "Starting knowledge server '{}': {} {}",
            config.name,
            config.command,
            config.args.join(" ")
        );

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("server stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("server stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "{}", line);
                }
            });
        }

        let mut client = Self::connect(&config.name, stdout, stdin, config.timeout).await?;
        let name = config.name.clone();
        client.supervisor = Some(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => warn!("Knowledge server '{}' exited: {}", name, status),
                Err(e) => warn!("Knowledge server '{}' wait failed: {}", name, e),
            }
        }));
        Ok(client)
    }

    /// Run the handshake over an already-open transport.
    pub async fn connect<R, W>(
        name: &str,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Result<Self, McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let writer: Writer = Arc::new(Mutex::new(writer));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            name.to_string(),
            reader,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        let client = Self {
            name: name.to_string(),
            writer,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            alive,
            reader,
            supervisor: None,
        };

        let init = client
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;
        debug!(server = %client.name, "initialize result: {}", init);

        client.notify("notifications/initialized", None).await?;
        info!("Knowledge server '{}' ready", client.name);
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the server has hung up; every later request would fail.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// List every tool the server offers, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!(
            "Knowledge server '{}' still paginating after {} pages, keeping {} tools",
            self.name,
            MAX_LIST_PAGES,
            tools.len()
        );
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(&RpcRequest::new(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(err.into());
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.send(&RpcRequest::notification(method, params)).await
    }

    async fn send(&self, request: &RpcRequest) -> Result<(), McpError> {
        let line = serde_json::to_string(request)?;
        write_line(&self.writer, &line).await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(supervisor) = &self.supervisor {
            supervisor.abort();
        }
    }
}

async fn write_line(writer: &Writer, line: &str) -> Result<(), McpError> {
    let mut w = writer.lock().await;
    w.write_all(line.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;
    Ok(())
}

async fn read_loop<R>(
    name: String,
    reader: R,
    writer: Writer,
    pending: Pending,
    alive: Arc<AtomicBool>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(server = %name, "read failed: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Incoming::parse(line) {
            Some(Incoming::Response(response)) => {
                let Some(id) = response.id.as_u64() else {
                    warn!(server = %name, "response with unexpected id {}", response.id);
                    continue;
                };
                match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(server = %name, "dropping response to unknown request {}", id),
                }
            }
            Some(Incoming::Request { id, method }) => {
                let reply = if method == "ping" {
                    RpcResponse::success(id, json!({}))
                } else {
                    RpcResponse::error(id, error_codes::METHOD_NOT_FOUND, "method not supported")
                };
                match serde_json::to_string(&reply) {
                    Ok(text) => {
                        if let Err(e) = write_line(&writer, &text).await {
                            warn!(server = %name, "failed to answer '{}': {}", method, e);
                        }
                    }
                    Err(e) => warn!(server = %name, "failed to encode reply: {}", e),
                }
            }
            Some(Incoming::Notification { method }) => {
                debug!(server = %name, "notification '{}'", method);
            }
            None => debug!(server = %name, "ignoring non-protocol output: {}", line),
        }
    }

    debug!(server = %name, "connection closed");
    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiting request with `Closed`.
    pending.lock().await.clear();
}

/// A remote tool exposed through the local `Tool` trait.
pub struct McpTool {
    client: Arc<McpClient>,
    info: RemoteToolInfo,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, info: RemoteToolInfo) -> Self {
        Self { client, info }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn invoke(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let arguments = match input {
            Value::Null => json!({}),
            Value::Object(_) => input,
            other => {
                return Err(ToolError::InvalidInput {
                    tool: self.info.name.clone(),
                    reason: format!("expected an object, got {}", other),
                })
            }
        };

        debug!(server = %self.client.name(), "calling '{}'", self.info.name);
        let result = self
            .client
            .call_tool(&self.info.name, arguments)
            .await
            .map_err(|e| ToolError::Remote {
                tool: self.info.name.clone(),
                reason: e.to_string(),
            })?;

        let content = result.render();
        if result.is_error {
            return Err(ToolError::ExecutionFailed {
                tool: self.info.name.clone(),
                reason: content,
            });
        }
        Ok(ToolOutput::text(content))
    }

    fn is_available(&self) -> bool {
        self.client.is_alive()
    }
}

/// Start the knowledge server and wrap each of its tools.
pub async fn load_remote_tools(config: &McpServerConfig) -> Result<Vec<Arc<dyn Tool>>, McpError> {
    let client = Arc::new(McpClient::spawn(config).await?);
    let infos = client.list_tools().await?;
    info!("Knowledge server '{}' offers {} tools", config.name, infos.len());

    Ok(infos
        .into_iter()
        .map(|info| Arc::new(McpTool::new(Arc::clone(&client), info)) as Arc<dyn Tool>)
        .collect())
}
