//! Deterministic in-process connector

use super::{CapabilityInfo, InvokeResult, ToolConnector, ToolSession};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A scripted misbehavior, consumed by the next `connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Refuse the connection
    Refuse(String),
    /// Sleep before accepting; longer than the caller's timeout simulates a hang
    Stall(Duration),
    /// Accept, but report the next invocation on this session as failed
    ToolError(String),
    /// Accept, but sleep inside every invocation on this session after
    /// the call has been recorded
    SlowInvoke(Duration),
}

/// One invocation observed by the simulated server
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Address the session was opened against
    pub address: String,
    /// Capability invoked
    pub capability: String,
    /// Raw parameters as received
    pub params: Value,
}

#[derive(Default)]
struct SimState {
    servers: HashMap<String, Vec<CapabilityInfo>>,
    offline: HashSet<String>,
    faults: VecDeque<Fault>,
    calls: Vec<RecordedCall>,
    connects: usize,
}

/// Connector that never leaves the process.
///
/// Any address connects unless it is marked offline or a [`Fault`] is
/// queued. Invocations echo their capability and parameters back.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedConnector {
    /// Create a connector with no servers configured
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advertise capabilities for an address
    pub fn with_server(
        self,
        address: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let caps = capabilities
            .into_iter()
            .map(|name| {
                let name = name.into();
                CapabilityInfo {
                    description: format!("simulated capability {}", name),
                    input_schema: json!({"type": "object"}),
                    name,
                }
            })
            .collect();
        self.state().servers.insert(address.into(), caps);
        self
    }

    /// Take an address offline (every connect refuses) or bring it back
    pub fn set_offline(&self, address: &str, offline: bool) {
        let mut state = self.state();
        if offline {
            state.offline.insert(address.to_string());
        } else {
            state.offline.remove(address);
        }
    }

    /// Queue a fault for an upcoming connect
    pub fn script(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Every invocation observed so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Number of connect attempts observed
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }
}

#[async_trait]
impl ToolConnector for SimulatedConnector {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&self, address: &str, _timeout: Duration) -> Result<Box<dyn ToolSession>> {
        let (fault, offline) = {
            let mut state = self.state();
            state.connects += 1;
            (state.faults.pop_front(), state.offline.contains(address))
        };

        if offline {
            return Err(WardenError::Connection(format!("{} is offline", address)));
        }

        let mut pending_error = None;
        let mut invoke_delay = None;
        match fault {
            Some(Fault::Refuse(reason)) => {
                return Err(WardenError::Connection(format!(
                    "connection to {} refused: {}",
                    address, reason
                )));
            }
            Some(Fault::Stall(delay)) => tokio::time::sleep(delay).await,
            Some(Fault::ToolError(message)) => pending_error = Some(message),
            Some(Fault::SlowInvoke(delay)) => invoke_delay = Some(delay),
            None => {}
        }

        Ok(Box::new(SimulatedSession {
            address: address.to_string(),
            state: Arc::clone(&self.state),
            pending_error,
            invoke_delay,
        }))
    }
}

struct SimulatedSession {
    address: String,
    state: Arc<Mutex<SimState>>,
    pending_error: Option<String>,
    invoke_delay: Option<Duration>,
}

#[async_trait]
impl ToolSession for SimulatedSession {
    async fn list_capabilities(&mut self, _timeout: Duration) -> Result<Vec<CapabilityInfo>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state.servers.get(&self.address).cloned().unwrap_or_default())
    }

    async fn invoke(
        &mut self,
        capability: &str,
        params: Value,
        _timeout: Duration,
    ) -> Result<InvokeResult> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.calls.push(RecordedCall {
                address: self.address.clone(),
                capability: capability.to_string(),
                params: params.clone(),
            });
        }

        if let Some(delay) = self.invoke_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.pending_error.take() {
            return Ok(InvokeResult::failed(message));
        }
        Ok(InvokeResult::ok(json!({
            "capability": capability,
            "echo": params,
        })))
    }

    async fn disconnect(self: Box<Self>) {}
}
