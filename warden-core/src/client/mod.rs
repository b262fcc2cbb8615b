//! External tool client adapter
//!
//! A thin, opaque capability for talking to external tool servers. The
//! governance service is the only consumer; it treats every call as capable
//! of failing and wraps each one in its configured timeout.
//!
//! Two connectors ship with the crate:
//! - [`SimulatedConnector`]: deterministic, in-process, scriptable faults
//! - [`StdioConnector`]: spawns the tool's command and speaks newline-delimited
//!   JSON-RPC 2.0 (`initialize`, `tools/list`, `tools/call`)

pub mod protocol;
mod simulated;
mod stdio;

pub use simulated::{Fault, RecordedCall, SimulatedConnector};
pub use stdio::StdioConnector;

use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// A capability advertised by an external tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    /// Capability name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the capability's input
    #[serde(default)]
    pub input_schema: Value,
}

/// Outcome reported by the external server for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResult {
    /// Whether the server reported success
    pub success: bool,
    /// Output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error text on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvokeResult {
    /// A successful invocation
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    /// A failed invocation
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a liveness check (connect + list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReport {
    /// Number of capabilities the server advertised
    pub capability_count: usize,
}

/// An open session with one external tool server
#[async_trait]
pub trait ToolSession: Send {
    /// Discover the server's capabilities
    async fn list_capabilities(&mut self, timeout: Duration) -> Result<Vec<CapabilityInfo>>;

    /// Invoke a capability.
    ///
    /// `Err` means the call never completed (connection lost, timed out);
    /// a completed call the server reports as failed is `Ok` with
    /// `success = false`.
    async fn invoke(
        &mut self,
        capability: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<InvokeResult>;

    /// Close the session; never fails
    async fn disconnect(self: Box<Self>);
}

/// Opens sessions with external tool servers
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Connector name for logs
    fn name(&self) -> &str;

    /// Open a session with the server at `address`
    async fn connect(&self, address: &str, timeout: Duration) -> Result<Box<dyn ToolSession>>;

    /// Connect, list capabilities, disconnect
    async fn ping(&self, address: &str, timeout: Duration) -> Result<PingReport> {
        let mut session = self.connect(address, timeout).await?;
        let listed = session.list_capabilities(timeout).await;
        session.disconnect().await;
        Ok(PingReport {
            capability_count: listed?.len(),
        })
    }
}

/// Run `fut` under `timeout`, mapping expiry to [`WardenError::Timeout`]
pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(WardenError::Timeout(format!(
            "{} exceeded {:?}",
            what, timeout
        ))),
    }
}
