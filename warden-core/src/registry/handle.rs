//! Callable handles and the per-call context passed to them

use super::result::ToolError;
use crate::governance::Caller;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a handle gets to see about one call
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Invoking agent
    pub caller: Caller,

    /// Tool arguments
    pub params: Value,

    /// Per-invocation human approval (restricted tools)
    pub approval_token_present: bool,

    /// Capability to invoke on a governed tool
    pub capability: Option<String>,

    /// Trace ID for correlation
    pub trace_id: Option<String>,

    /// Cancellation token
    pub cancellation: Option<CancellationToken>,
}

impl ToolCall {
    /// Create a call with no token, capability or trace id
    pub fn new(caller: Caller, params: Value) -> Self {
        Self {
            caller,
            params,
            approval_token_present: false,
            capability: None,
            trace_id: None,
            cancellation: None,
        }
    }

    /// Set whether the approval token is present
    pub fn with_approval_token(mut self, present: bool) -> Self {
        self.approval_token_present = present;
        self
    }

    /// Select a capability
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    /// Set trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Set cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// A handle that suspends; awaited directly on the calling task
#[async_trait]
pub trait AsyncToolFn: Send + Sync {
    /// Run the tool
    async fn call(&self, call: &ToolCall) -> Result<Value, ToolError>;
}

/// A handle that blocks; run on the bounded worker pool
pub trait BlockingToolFn: Send + Sync {
    /// Run the tool
    fn call(&self, call: &ToolCall) -> Result<Value, ToolError>;
}

impl<F> BlockingToolFn for F
where
    F: Fn(&ToolCall) -> Result<Value, ToolError> + Send + Sync,
{
    fn call(&self, call: &ToolCall) -> Result<Value, ToolError> {
        self(call)
    }
}

/// Declared execution mode of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Awaited on the caller's task
    Suspending,
    /// Offloaded to the worker pool
    Blocking,
}

/// A dispatchable implementation with its declared mode
#[derive(Clone)]
pub enum ToolHandle {
    /// Suspending implementation
    Async(Arc<dyn AsyncToolFn>),
    /// Blocking implementation
    Blocking(Arc<dyn BlockingToolFn>),
}

impl ToolHandle {
    /// Wrap a suspending implementation
    pub fn suspending(f: impl AsyncToolFn + 'static) -> Self {
        ToolHandle::Async(Arc::new(f))
    }

    /// Wrap a blocking implementation
    pub fn blocking(f: impl BlockingToolFn + 'static) -> Self {
        ToolHandle::Blocking(Arc::new(f))
    }

    /// Wrap a blocking closure
    pub fn blocking_fn<F>(f: F) -> Self
    where
        F: Fn(&ToolCall) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        ToolHandle::Blocking(Arc::new(f))
    }

    /// Declared execution mode
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ToolHandle::Async(_) => ExecutionMode::Suspending,
            ToolHandle::Blocking(_) => ExecutionMode::Blocking,
        }
    }
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToolHandle({:?})", self.mode())
    }
}
