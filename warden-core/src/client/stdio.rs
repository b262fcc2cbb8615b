//! Connector for tool servers launched as child processes
//!
//! The address is a command line (`npx some-server --flag`), split on
//! whitespace and executed without a shell. Messages are newline-delimited
//! JSON-RPC on the child's stdin/stdout.

use super::protocol::{
    InitializeParams, RpcIncoming, RpcNotification, RpcRequest, ToolCallParams, ToolCallResult,
    ToolsListResult,
};
use super::{CapabilityInfo, InvokeResult, ToolConnector, ToolSession, bounded};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Spawns a process per session
#[derive(Debug, Clone, Default)]
pub struct StdioConnector;

impl StdioConnector {
    /// Create a new stdio connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolConnector for StdioConnector {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn connect(&self, address: &str, timeout: Duration) -> Result<Box<dyn ToolSession>> {
        if address.contains("://") {
            return Err(WardenError::Connection(format!(
                "stdio connector cannot reach network address {}",
                address
            )));
        }

        let mut parts = address.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| WardenError::Connection("empty command".to_string()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::Connection(format!("failed to spawn '{}': {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WardenError::Connection("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WardenError::Connection("child stdout unavailable".to_string()))?;

        let mut session = StdioSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
        };

        let params = serde_json::to_value(InitializeParams::default())?;
        bounded(timeout, "initialize", session.request("initialize", Some(params))).await?;
        session
            .send_line(&RpcNotification::new("notifications/initialized"))
            .await?;

        tracing::debug!(command = %program, "Stdio tool session established");
        Ok(Box::new(session))
    }
}

struct StdioSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl StdioSession {
    async fn send_line<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| WardenError::Connection(format!("write to tool server failed: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| WardenError::Connection(format!("flush to tool server failed: {}", e)))
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        self.send_line(&RpcRequest::new(id, method, params)).await?;

        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| WardenError::Connection(format!("read from tool server failed: {}", e)))?
                .ok_or_else(|| {
                    WardenError::Connection(format!("tool server closed during {}", method))
                })?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let incoming: RpcIncoming = match serde_json::from_str(trimmed) {
                Ok(incoming) => incoming,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping non-JSON line from tool server");
                    continue;
                }
            };
            if !incoming.answers(id) {
                continue;
            }
            if let Some(error) = incoming.error {
                return Err(WardenError::Connection(format!(
                    "{} failed ({}): {}",
                    method, error.code, error.message
                )));
            }
            return Ok(incoming.result.unwrap_or(Value::Null));
        }
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn list_capabilities(&mut self, timeout: Duration) -> Result<Vec<CapabilityInfo>> {
        let result = bounded(timeout, "tools/list", self.request("tools/list", None)).await?;
        let listed: ToolsListResult = serde_json::from_value(result)?;
        Ok(listed.tools.into_iter().map(Into::into).collect())
    }

    async fn invoke(
        &mut self,
        capability: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<InvokeResult> {
        let call = serde_json::to_value(ToolCallParams {
            name: capability.to_string(),
            arguments: params,
        })?;
        let result = bounded(timeout, "tools/call", self.request("tools/call", Some(call))).await?;
        let result: ToolCallResult = serde_json::from_value(result)?;
        Ok(result.into())
    }

    async fn disconnect(mut self: Box<Self>) {
        let _ = self.stdin.shutdown().await;
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Tool server already exited");
        }
    }
}
