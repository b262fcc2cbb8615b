//! Administrative surface consumed by outer layers (HTTP routes, the CLI)
//!
//! Each lifecycle call commits through the governance service first and only
//! then touches the registry, so by the time `revoke` or `disable` returns
//! the tool's entry is already gone from the live registry.

use crate::bridge::RegistryBridge;
use crate::error::Result;
use crate::governance::{
    Actor, ActorRole, AuditView, ExecutionOutcome, ExecutionRequest, GovernanceService,
    HealthReport, ToolDescriptor, ToolFilter, ToolId, ToolProposal,
};
use std::sync::Arc;

/// Facade over governance plus registry synchronization
#[derive(Clone)]
pub struct ToolAdmin {
    governance: Arc<GovernanceService>,
    bridge: Arc<RegistryBridge>,
}

impl ToolAdmin {
    /// Create a facade
    pub fn new(governance: Arc<GovernanceService>, bridge: Arc<RegistryBridge>) -> Self {
        Self { governance, bridge }
    }

    /// List tools visible to `role`
    pub async fn list(&self, filter: ToolFilter, role: ActorRole) -> Result<Vec<ToolDescriptor>> {
        self.governance.list_tools(filter, role).await
    }

    /// Propose a tool
    pub async fn propose(&self, proposal: ToolProposal, actor: &Actor) -> Result<ToolDescriptor> {
        self.governance.propose_tool(proposal, actor).await
    }

    /// Get one tool
    pub async fn get(&self, id: ToolId) -> Result<ToolDescriptor> {
        self.governance.get_tool(id).await
    }

    /// Get one tool by name
    pub async fn find(&self, name: &str) -> Result<ToolDescriptor> {
        self.governance.find_tool(name).await
    }

    /// Approve, then project into the registry
    pub async fn approve(&self, id: ToolId, actor: &Actor, reference: Option<String>) -> Result<ToolDescriptor> {
        let tool = self.governance.approve_tool(id, actor, reference).await?;
        self.bridge.sync_one(&tool).await?;
        Ok(tool)
    }

    /// Reject a proposal; nothing was projected, so the registry is untouched
    pub async fn reject(&self, id: ToolId, actor: &Actor, reason: &str) -> Result<ToolDescriptor> {
        self.governance.reject_tool(id, actor, reason).await
    }

    /// Revoke, then remove from the registry before returning
    pub async fn revoke(&self, id: ToolId, actor: &Actor, reason: &str) -> Result<ToolDescriptor> {
        let tool = self.governance.revoke_tool(id, actor, reason).await?;
        self.bridge.deregister(&tool).await;
        Ok(tool)
    }

    /// Disable, then remove from the registry before returning
    pub async fn disable(&self, id: ToolId, actor: &Actor, reason: &str) -> Result<ToolDescriptor> {
        let tool = self.governance.disable_tool(id, actor, reason).await?;
        self.bridge.deregister(&tool).await;
        Ok(tool)
    }

    /// Re-enable, then project into the registry again
    pub async fn enable(&self, id: ToolId, actor: &Actor) -> Result<ToolDescriptor> {
        let tool = self.governance.enable_tool(id, actor).await?;
        self.bridge.sync_one(&tool).await?;
        Ok(tool)
    }

    /// Execute through the governance gate
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        self.governance.authorize_and_execute(request).await
    }

    /// Check a tool's server
    pub async fn health(&self, id: ToolId) -> Result<HealthReport> {
        self.governance.check_health(id).await
    }

    /// Read the audit trail
    pub async fn audit(&self, id: ToolId, limit: Option<usize>) -> Result<AuditView> {
        self.governance.audit(id, limit).await
    }
}
