//! Registry bridge: projects approved descriptors into the live registry
//!
//! The bridge is the only writer of governance-backed registry entries.
//! Projected handles carry just the tool id and re-enter
//! [`GovernanceService::authorize_and_execute`] on every call, so a briefly
//! stale entry can never bypass tier or approval checks.
//!
//! Bridge operations are serialized and always act on a fresh read of the
//! descriptor, never on the snapshot the caller passes in. Whatever order
//! lifecycle commits and their follow-up syncs interleave in, the registry
//! ends up matching the last committed status.

use crate::error::Result;
use crate::governance::{ExecutionRequest, GovernanceService, ToolDescriptor, ToolId};
use crate::registry::{
    AsyncToolFn, GovernanceLink, LiveRegistry, RegistryEntry, ToolCall, ToolError, ToolHandle,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Dispatch handle of a projected entry
pub struct GovernedInvoker {
    tool_id: ToolId,
    governance: Arc<GovernanceService>,
}

impl GovernedInvoker {
    /// Create an invoker for one governed tool
    pub fn new(tool_id: ToolId, governance: Arc<GovernanceService>) -> Self {
        Self {
            tool_id,
            governance,
        }
    }
}

#[async_trait]
impl AsyncToolFn for GovernedInvoker {
    async fn call(&self, call: &ToolCall) -> std::result::Result<Value, ToolError> {
        let mut request = ExecutionRequest::new(self.tool_id, call.caller.clone(), call.params.clone())
            .with_approval_token(call.approval_token_present);
        if let Some(capability) = &call.capability {
            request = request.with_capability(capability.clone());
        }

        // Runs on its own task so a cancelled or timed-out dispatch still
        // leaves the audit entry and counters behind.
        let governance = Arc::clone(&self.governance);
        let outcome = tokio::spawn(async move { governance.authorize_and_execute(request).await })
            .await
            .map_err(|e| ToolError::internal(format!("governed execution crashed: {}", e)))??;
        if outcome.success {
            Ok(outcome.output.unwrap_or(Value::Null))
        } else {
            Err(ToolError::upstream(
                outcome
                    .error
                    .unwrap_or_else(|| format!("tool '{}' failed", outcome.tool_name)),
            ))
        }
    }
}

/// Keeps the live registry consistent with persisted governance state
pub struct RegistryBridge {
    governance: Arc<GovernanceService>,
    registry: Arc<LiveRegistry>,
    prefix: String,
    sync_lock: Mutex<()>,
}

impl RegistryBridge {
    /// Create a bridge; `prefix` namespaces governed keys away from built-ins
    pub fn new(
        governance: Arc<GovernanceService>,
        registry: Arc<LiveRegistry>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            governance,
            registry,
            prefix: prefix.into(),
            sync_lock: Mutex::new(()),
        }
    }

    /// Registry key for a tool name
    pub fn registry_key(&self, tool_name: &str) -> String {
        format!("{}{}", self.prefix, tool_name)
    }

    /// Project every approved, non-forbidden descriptor and drop governed
    /// entries that no longer qualify. Returns the number projected.
    ///
    /// # Errors
    ///
    /// Propagates store and registry failures.
    pub async fn full_sync(&self) -> Result<usize> {
        let _guard = self.sync_lock.lock().await;
        let approved = self.governance.approved_tools().await?;
        let wanted: BTreeSet<String> = approved.iter().map(|t| self.registry_key(&t.name)).collect();

        for tool in &approved {
            self.registry.register(self.project(tool)).await?;
        }

        for key in self.managed_keys().await {
            if !wanted.contains(&key) {
                self.registry.deregister(&key).await;
                tracing::info!(key = %key, "Dropped stale governed entry during sync");
            }
        }

        tracing::info!(count = approved.len(), "Governed tools synchronized");
        Ok(approved.len())
    }

    /// (Re)register one tool after approval or re-enable.
    ///
    /// The descriptor is re-read first. If it is no longer approved, or is
    /// forbidden, any entry under its key is removed and `Ok(false)` is
    /// returned.
    ///
    /// # Errors
    ///
    /// Propagates store and registry failures.
    pub async fn sync_one(&self, tool: &ToolDescriptor) -> Result<bool> {
        let _guard = self.sync_lock.lock().await;
        let current = self.governance.get_tool(tool.id).await?;
        let key = self.registry_key(&current.name);

        if !current.is_projectable() {
            tracing::debug!(
                tool = %current.name,
                status = %current.status,
                tier = %current.tier,
                "Skipping sync of non-projectable tool"
            );
            if self.registry.deregister(&key).await {
                tracing::warn!(key = %key, status = %current.status, "Dropped stale governed entry");
            }
            return Ok(false);
        }

        self.registry.register(self.project(&current)).await?;
        tracing::info!(key = %key, "Governed tool registered");
        Ok(true)
    }

    /// Remove a tool's entry after revoke or disable. Returns whether an
    /// entry was removed.
    ///
    /// An entry is kept if the fresh descriptor is projectable again, which
    /// happens when an enable committed after the disable this call follows.
    pub async fn deregister(&self, tool: &ToolDescriptor) -> bool {
        let _guard = self.sync_lock.lock().await;
        let key = self.registry_key(&tool.name);

        match self.governance.get_tool(tool.id).await {
            Ok(current) if current.is_projectable() => {
                tracing::debug!(key = %key, "Tool projectable again, keeping entry");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not re-read tool, removing entry");
            }
        }

        let removed = self.registry.deregister(&key).await;
        if removed {
            tracing::warn!(key = %key, status = %tool.status, "Governed tool deregistered");
        } else {
            tracing::debug!(key = %key, "Deregister for key not in registry");
        }
        removed
    }

    /// Keys of every governance-projected entry
    pub async fn managed_keys(&self) -> Vec<String> {
        self.registry.governed_keys().await
    }

    fn project(&self, tool: &ToolDescriptor) -> RegistryEntry {
        let handle = ToolHandle::suspending(GovernedInvoker::new(tool.id, Arc::clone(&self.governance)));
        RegistryEntry::new(
            self.registry_key(&tool.name),
            format!("[{}] {}", tool.tier.as_str().to_uppercase(), tool.description),
            handle,
        )
        .with_schema(parameter_schema(tool))
        .with_authorized(tool.tier.authorized_callers())
        .with_linkage(GovernanceLink {
            source_tool_id: tool.id,
            source_tier: tool.tier,
            tool_name: tool.name.clone(),
            address: tool.address.clone(),
        })
    }
}

fn parameter_schema(tool: &ToolDescriptor) -> Value {
    let mut properties = json!({
        "params": {
            "type": "object",
            "description": "Arguments passed to the external tool",
        },
        "approval_token": {
            "type": "boolean",
            "description": "Per-invocation human approval; required for restricted tools",
        },
    });
    if !tool.capabilities.is_empty() {
        properties["capability"] = json!({
            "type": "string",
            "description": "Capability to invoke",
            "enum": tool.capabilities,
        });
    }
    json!({
        "type": "object",
        "properties": properties,
    })
}
