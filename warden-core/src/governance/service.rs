//! Governance service: the single writer of tool descriptors
//!
//! Lifecycle operations are raised-channel: rule violations surface as
//! [`WardenError`]. Execution and health probing are returned-channel: any
//! adapter failure becomes part of the [`ExecutionOutcome`] or
//! [`HealthReport`] and is booked against the tool's counters.

use super::descriptor::{
    AuditEntry, AuditOutcome, HealthSample, HealthState, ToolDescriptor, ToolId, ToolProposal, ToolStatus,
};
use super::fingerprint::fingerprint_params;
use super::store::{ToolFilter, ToolStore};
use super::tier::{Actor, ActorRole, Caller, ToolTier};
use crate::client::{InvokeResult, ToolConnector, bounded};
use crate::config::{AdapterConfig, GovernanceConfig};
use crate::error::{Result, WardenError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// A request to run a governed tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Tool to run
    pub tool_id: ToolId,
    /// Invoking agent
    pub caller: Caller,
    /// Parameters passed to the external capability
    pub params: Value,
    /// Per-invocation human approval, required for restricted tools
    #[serde(default)]
    pub approval_token_present: bool,
    /// Capability to invoke; defaults to the tool name
    #[serde(default)]
    pub capability: Option<String>,
}

impl ExecutionRequest {
    /// Create a request without an approval token
    pub fn new(tool_id: ToolId, caller: Caller, params: Value) -> Self {
        Self {
            tool_id,
            caller,
            params,
            approval_token_present: false,
            capability: None,
        }
    }

    /// Set whether the per-invocation approval token is present
    pub fn with_approval_token(mut self, present: bool) -> Self {
        self.approval_token_present = present;
        self
    }

    /// Select a capability
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }
}

/// What happened when a governed tool ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Tool that ran
    pub tool_id: ToolId,
    /// Its name
    pub tool_name: String,
    /// Capability invoked
    pub capability: String,
    /// Whether the external call succeeded
    pub success: bool,
    /// Output on success
    pub output: Option<Value>,
    /// Error text on failure
    pub error: Option<String>,
    /// Fingerprint recorded in the audit trail
    pub input_fingerprint: String,
    /// Wall-clock latency of the external call
    pub latency_ms: u64,
    /// When the audit entry was written
    pub timestamp: DateTime<Utc>,
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Checked tool
    pub tool_id: ToolId,
    /// Its name
    pub tool_name: String,
    /// Whether this check succeeded
    pub healthy: bool,
    /// Health state after the check
    pub health: HealthState,
    /// Check latency
    pub latency_ms: u64,
    /// Capabilities discovered (0 on failure)
    pub capability_count: usize,
    /// Failure description
    pub error: Option<String>,
    /// Lifetime failures
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// When the check finished
    pub checked_at: DateTime<Utc>,
}

/// A bounded window onto a tool's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditView {
    /// Tool id
    pub tool_id: ToolId,
    /// Tool name
    pub tool_name: String,
    /// Entries in the full trail
    pub total: usize,
    /// Newest first, at most the requested limit
    pub entries: Vec<AuditEntry>,
}

/// Owns persisted tool descriptors and gates every execution
pub struct GovernanceService {
    store: Arc<dyn ToolStore>,
    connector: Arc<dyn ToolConnector>,
    rules: GovernanceConfig,
    adapter: AdapterConfig,
}

impl GovernanceService {
    /// Create a service over a store and connector
    pub fn new(
        store: Arc<dyn ToolStore>,
        connector: Arc<dyn ToolConnector>,
        rules: GovernanceConfig,
        adapter: AdapterConfig,
    ) -> Self {
        Self {
            store,
            connector,
            rules,
            adapter,
        }
    }

    /// Governance policy in effect
    pub fn rules(&self) -> &GovernanceConfig {
        &self.rules
    }

    /// Persist a new proposal.
    ///
    /// # Errors
    ///
    /// [`WardenError::Validation`] on malformed input,
    /// [`WardenError::DuplicateName`] on a name collision.
    pub async fn propose_tool(&self, proposal: ToolProposal, proposer: &Actor) -> Result<ToolDescriptor> {
        let tool = ToolDescriptor::propose(proposal, &proposer.id, &self.rules)?;
        self.store.insert(tool.clone()).await?;

        tracing::info!(
            tool = %tool.name,
            id = %tool.id,
            tier = %tool.tier,
            proposer = %proposer.id,
            "Tool proposed"
        );
        Ok(tool)
    }

    /// `proposed → approved`
    ///
    /// # Errors
    ///
    /// [`WardenError::Permission`] for non-governing roles,
    /// [`WardenError::NotFound`] for unknown ids, and
    /// [`WardenError::InvalidTransition`] for the wrong state or a forbidden tier.
    pub async fn approve_tool(
        &self,
        id: ToolId,
        approver: &Actor,
        reference: Option<String>,
    ) -> Result<ToolDescriptor> {
        approver.require_governing("approve")?;
        let approver_id = approver.id.clone();
        let tool = self
            .store
            .update(id, Box::new(move |t| t.approve(&approver_id, reference)))
            .await?;

        tracing::info!(tool = %tool.name, id = %id, approver = %approver.id, "Tool approved");
        Ok(tool)
    }

    /// `proposed → rejected`
    ///
    /// # Errors
    ///
    /// As [`Self::approve_tool`], plus [`WardenError::Validation`] for an empty reason.
    pub async fn reject_tool(&self, id: ToolId, rejecter: &Actor, reason: &str) -> Result<ToolDescriptor> {
        rejecter.require_governing("reject")?;
        let rejecter_id = rejecter.id.clone();
        let reason = reason.to_string();
        let tool = self
            .store
            .update(id, Box::new(move |t| t.reject(&rejecter_id, &reason)))
            .await?;

        tracing::info!(tool = %tool.name, id = %id, rejecter = %rejecter.id, "Tool rejected");
        Ok(tool)
    }

    /// `approved → revoked`
    ///
    /// # Errors
    ///
    /// As [`Self::reject_tool`].
    pub async fn revoke_tool(&self, id: ToolId, revoker: &Actor, reason: &str) -> Result<ToolDescriptor> {
        revoker.require_governing("revoke")?;
        let revoker_id = revoker.id.clone();
        let reason = reason.to_string();
        let tool = self
            .store
            .update(id, Box::new(move |t| t.revoke(&revoker_id, &reason)))
            .await?;

        tracing::warn!(tool = %tool.name, id = %id, revoker = %revoker.id, "Tool revoked");
        Ok(tool)
    }

    /// `approved → disabled`
    ///
    /// # Errors
    ///
    /// As [`Self::reject_tool`].
    pub async fn disable_tool(&self, id: ToolId, actor: &Actor, reason: &str) -> Result<ToolDescriptor> {
        actor.require_governing("disable")?;
        let actor_id = actor.id.clone();
        let reason = reason.to_string();
        let tool = self
            .store
            .update(id, Box::new(move |t| t.disable(&actor_id, &reason)))
            .await?;

        tracing::warn!(tool = %tool.name, id = %id, actor = %actor.id, "Tool disabled");
        Ok(tool)
    }

    /// `disabled → approved`
    ///
    /// # Errors
    ///
    /// As [`Self::approve_tool`].
    pub async fn enable_tool(&self, id: ToolId, actor: &Actor) -> Result<ToolDescriptor> {
        actor.require_governing("enable")?;
        let actor_id = actor.id.clone();
        let tool = self
            .store
            .update(id, Box::new(move |t| t.enable(&actor_id)))
            .await?;

        tracing::info!(tool = %tool.name, id = %id, actor = %actor.id, "Tool re-enabled");
        Ok(tool)
    }

    /// Get a descriptor by id
    ///
    /// # Errors
    ///
    /// [`WardenError::NotFound`] for unknown ids.
    pub async fn get_tool(&self, id: ToolId) -> Result<ToolDescriptor> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("tool {}", id)))
    }

    /// Get a descriptor by name
    ///
    /// # Errors
    ///
    /// [`WardenError::NotFound`] for unknown names.
    pub async fn find_tool(&self, name: &str) -> Result<ToolDescriptor> {
        self.store
            .find_by_name(name)
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("tool '{}'", name)))
    }

    /// List descriptors visible to `role`.
    ///
    /// Governing roles see everything the filter matches; other roles see
    /// approved tools only, whatever status they ask for.
    pub async fn list_tools(&self, filter: ToolFilter, role: ActorRole) -> Result<Vec<ToolDescriptor>> {
        let filter = if role.can_govern() {
            filter
        } else {
            ToolFilter {
                status: Some(ToolStatus::Approved),
                ..filter
            }
        };
        self.store.list(&filter).await
    }

    /// Descriptors eligible for projection into the live registry
    pub async fn approved_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let approved = self
            .store
            .list(&ToolFilter::any().with_status(ToolStatus::Approved))
            .await?;
        Ok(approved.into_iter().filter(|t| t.is_projectable()).collect())
    }

    /// Re-check authorization, run the external call, and book the outcome.
    ///
    /// Steps that can raise (lookup, approval state, caller tier, approval
    /// token, capability) all run before the adapter is touched. After that,
    /// every attempt appends exactly one audit entry.
    ///
    /// # Errors
    ///
    /// [`WardenError::NotFound`], [`WardenError::InvalidTransition`],
    /// [`WardenError::Permission`] and [`WardenError::Validation`] before any
    /// adapter call; [`WardenError::Storage`] if the audit entry cannot be
    /// persisted. Adapter failures are never raised.
    pub async fn authorize_and_execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let tool = self.get_tool(request.tool_id).await?;
        let capability = authorize(&tool, &request)?;

        let input_fingerprint = fingerprint_params(&request.params);
        let started = Instant::now();
        let result = self
            .call_external(&tool.address, &capability, request.params)
            .await;
        let latency_ms = elapsed_ms(started);

        let (output, outcome) = match result {
            Ok(InvokeResult {
                success: true,
                output,
                ..
            }) => (output, AuditOutcome::Success),
            Ok(InvokeResult { error, .. }) => (
                None,
                AuditOutcome::Failure {
                    error: error.unwrap_or_else(|| "tool reported failure".to_string()),
                },
            ),
            Err(e) => (
                None,
                AuditOutcome::Failure {
                    error: e.to_string(),
                },
            ),
        };

        let mut entry = AuditEntry {
            caller_id: request.caller.id.clone(),
            caller_tier: request.caller.tier,
            timestamp: Utc::now(),
            input_fingerprint: input_fingerprint.clone(),
            capability: capability.clone(),
            outcome: outcome.clone(),
            latency_ms,
        };
        let threshold = self.rules.health_failure_threshold;
        let updated = self
            .store
            .update(
                tool.id,
                Box::new(move |t| {
                    // stamped under the store lock so the trail stays time-ordered
                    entry.timestamp = Utc::now();
                    t.record_invocation(entry, threshold);
                    Ok(())
                }),
            )
            .await?;
        let timestamp = updated.last_used_at.unwrap_or_else(Utc::now);

        let error = match outcome {
            AuditOutcome::Success => {
                tracing::info!(
                    tool = %tool.name,
                    capability = %capability,
                    caller = %request.caller.id,
                    latency_ms,
                    "Tool executed"
                );
                None
            }
            AuditOutcome::Failure { error } => {
                tracing::warn!(
                    tool = %tool.name,
                    capability = %capability,
                    caller = %request.caller.id,
                    error = %error,
                    "Tool execution failed"
                );
                Some(error)
            }
        };

        Ok(ExecutionOutcome {
            tool_id: tool.id,
            tool_name: tool.name,
            capability,
            success: error.is_none(),
            output,
            error,
            input_fingerprint,
            latency_ms,
            timestamp,
        })
    }

    async fn call_external(&self, address: &str, capability: &str, params: Value) -> Result<InvokeResult> {
        let connect_timeout = self.adapter.connect_timeout;
        let invoke_timeout = self.adapter.invoke_timeout;

        let mut session = bounded(
            connect_timeout,
            "connect",
            self.connector.connect(address, connect_timeout),
        )
        .await?;
        let result = bounded(
            invoke_timeout,
            "invoke",
            session.invoke(capability, params, invoke_timeout),
        )
        .await;
        session.disconnect().await;
        result
    }

    /// Ping the tool's server and update its health fields.
    ///
    /// # Errors
    ///
    /// [`WardenError::NotFound`] for unknown ids and [`WardenError::Storage`]
    /// if the result cannot be persisted. Check failures are never raised.
    pub async fn check_health(&self, id: ToolId) -> Result<HealthReport> {
        let tool = self.get_tool(id).await?;
        let timeout = self.adapter.health_timeout;

        let started = Instant::now();
        let pinged = bounded(timeout, "health check", self.connector.ping(&tool.address, timeout)).await;
        let latency_ms = elapsed_ms(started);

        let healthy = pinged.is_ok();
        let recorded = match &pinged {
            Ok(report) => HealthSample::succeeded(latency_ms, report.capability_count),
            Err(_) => HealthSample::failed(latency_ms),
        };
        let threshold = self.rules.health_failure_threshold;
        let updated = self
            .store
            .update(
                id,
                Box::new(move |t| {
                    t.record_health(recorded, threshold);
                    Ok(())
                }),
            )
            .await?;

        if updated.health != tool.health {
            tracing::info!(
                tool = %updated.name,
                from = %tool.health,
                to = %updated.health,
                "Tool health changed"
            );
        }

        let (capability_count, error) = match pinged {
            Ok(report) => (report.capability_count, None),
            Err(e) => {
                tracing::warn!(
                    tool = %updated.name,
                    consecutive_failures = updated.consecutive_failures,
                    error = %e,
                    "Health check failed"
                );
                (0, Some(e.to_string()))
            }
        };

        Ok(HealthReport {
            tool_id: updated.id,
            tool_name: updated.name,
            healthy,
            health: updated.health,
            latency_ms,
            capability_count,
            error,
            failure_count: updated.failure_count,
            consecutive_failures: updated.consecutive_failures,
            checked_at: updated.last_health_check_at.unwrap_or_else(Utc::now),
        })
    }

    /// Most recent audit entries, newest first.
    ///
    /// `None` uses the configured default; any limit is clamped to the
    /// configured maximum.
    ///
    /// # Errors
    ///
    /// [`WardenError::NotFound`] for unknown ids.
    pub async fn audit_log(&self, id: ToolId, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
        Ok(self.audit(id, limit).await?.entries)
    }

    /// Audit entries plus the size of the full trail
    ///
    /// # Errors
    ///
    /// [`WardenError::NotFound`] for unknown ids.
    pub async fn audit(&self, id: ToolId, limit: Option<usize>) -> Result<AuditView> {
        let tool = self.get_tool(id).await?;
        let limit = limit
            .unwrap_or(self.rules.default_audit_limit)
            .min(self.rules.max_audit_limit);
        Ok(AuditView {
            tool_id: tool.id,
            total: tool.audit_log.len(),
            entries: tool.recent_audit(limit),
            tool_name: tool.name,
        })
    }
}

/// Execution gate; returns the capability to invoke
fn authorize(tool: &ToolDescriptor, request: &ExecutionRequest) -> Result<String> {
    if tool.status != ToolStatus::Approved {
        return Err(WardenError::InvalidTransition(format!(
            "tool '{}' is not approved (status: {})",
            tool.name, tool.status
        )));
    }
    if !tool.tier.authorized_callers().contains(request.caller.tier) {
        return Err(WardenError::Permission(format!(
            "caller tier {} may not invoke {} tool '{}'",
            request.caller.tier, tool.tier, tool.name
        )));
    }
    if tool.tier.requires_approval_token() && !request.approval_token_present {
        return Err(WardenError::Permission(format!(
            "tool '{}' is {} and requires a per-invocation approval token",
            tool.name,
            ToolTier::Restricted
        )));
    }

    match &request.capability {
        Some(cap) => {
            let cap = cap.trim();
            if cap.is_empty() {
                return Err(WardenError::Validation("capability must not be empty".to_string()));
            }
            if !tool.capabilities.is_empty() && !tool.capabilities.iter().any(|c| c == cap) {
                return Err(WardenError::Validation(format!(
                    "tool '{}' does not advertise capability '{}'",
                    tool.name, cap
                )));
            }
            Ok(cap.to_string())
        }
        None => Ok(tool.name.clone()),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
