//! Tool descriptor and lifecycle state machine
//!
//! Pure state and validation logic, no I/O. The governance service funnels
//! every mutation through these methods so the invariants below hold no
//! matter which store backs the records:
//!
//! - a `forbidden` descriptor never reaches `approved`
//! - approval metadata is present iff `status = approved`
//! - revocation metadata is present iff `status ∈ {revoked, disabled}`
//! - `failure_count` never decreases; `consecutive_failures` resets on success
//! - the audit trail is append-only
//!
//! ```text
//! proposed ──approve──▶ approved ──revoke──▶ revoked
//!     │                   │   ▲
//!   reject             disable enable
//!     ▼                   ▼   │
//! rejected              disabled
//! ```

use super::tier::{CallerTier, ToolTier};
use crate::config::GovernanceConfig;
use crate::error::{Result, WardenError};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("tool name pattern is valid")
});

/// Unique identifier of a governed tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(Uuid);

impl ToolId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ToolId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ToolId {
    type Err = WardenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(ToolId)
            .map_err(|e| WardenError::Validation(format!("invalid tool id '{}': {}", s, e)))
    }
}

/// Lifecycle status of a governed tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Awaiting a decision
    Proposed,
    /// Callable, subject to tier rules
    Approved,
    /// Proposal declined (terminal)
    Rejected,
    /// Permanently withdrawn (terminal)
    Revoked,
    /// Temporarily withdrawn; may be re-enabled
    Disabled,
}

impl ToolStatus {
    /// Get the string name of this status
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Proposed => "proposed",
            ToolStatus::Approved => "approved",
            ToolStatus::Rejected => "rejected",
            ToolStatus::Revoked => "revoked",
            ToolStatus::Disabled => "disabled",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolStatus::Rejected | ToolStatus::Revoked)
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolStatus {
    type Err = WardenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "proposed" => Ok(ToolStatus::Proposed),
            "approved" => Ok(ToolStatus::Approved),
            "rejected" => Ok(ToolStatus::Rejected),
            "revoked" => Ok(ToolStatus::Revoked),
            "disabled" => Ok(ToolStatus::Disabled),
            other => Err(WardenError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// Health signal of the external tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Last check or call succeeded
    Healthy,
    /// Failing, below the consecutive-failure threshold
    Degraded,
    /// Failing at or above the threshold
    Down,
    /// Never checked
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Down => "down",
            HealthState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Who approved a tool, and on what authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Approving identity
    pub approved_by: String,
    /// External reference such as a vote id
    pub reference: Option<String>,
    /// When the approval was recorded
    pub approved_at: DateTime<Utc>,
}

/// Who withdrew a tool, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Revoking identity
    pub revoked_by: String,
    /// Mandatory, non-empty justification
    pub reason: String,
    /// When the withdrawal was recorded
    pub revoked_at: DateTime<Utc>,
    /// Approval suspended by a disable, restored on enable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_approval: Option<ApprovalRecord>,
}

/// Who declined a proposal, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    /// Rejecting identity
    pub rejected_by: String,
    /// Non-empty justification
    pub reason: String,
    /// When the rejection was recorded
    pub rejected_at: DateTime<Utc>,
}

/// Result recorded for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// External call succeeded
    Success,
    /// External call failed
    Failure {
        /// Failure description
        error: String,
    },
}

impl AuditOutcome {
    /// Check if this outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, AuditOutcome::Success)
    }
}

/// One entry of the append-only audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Invoking agent
    pub caller_id: String,
    /// Invoking agent's tier
    pub caller_tier: CallerTier,
    /// When the invocation finished
    pub timestamp: DateTime<Utc>,
    /// One-way hash of the parameters (never the raw parameters)
    pub input_fingerprint: String,
    /// Capability invoked on the external server
    pub capability: String,
    /// Success or failure
    pub outcome: AuditOutcome,
    /// Wall-clock latency of the external call
    pub latency_ms: u64,
}

/// Input to a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProposal {
    /// Unique tool name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// Server URL or command
    pub address: String,
    /// Trust classification
    pub tier: ToolTier,
    /// Capability names advertised by the server
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Governing policy article
    #[serde(default)]
    pub constitutional_article: Option<String>,
}

impl ToolProposal {
    /// Create a proposal with no advertised capabilities
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        address: impl Into<String>,
        tier: ToolTier,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            address: address.into(),
            tier,
            capabilities: Vec::new(),
            constitutional_article: None,
        }
    }

    /// Set advertised capabilities
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the governing article
    pub fn with_article(mut self, article: impl Into<String>) -> Self {
        self.constitutional_article = Some(article.into());
        self
    }

    fn validate(&self, rules: &GovernanceConfig) -> Result<()> {
        let name = self.name.trim();
        let len = name.chars().count();
        if len < rules.name_min_len || len > rules.name_max_len {
            return Err(WardenError::Validation(format!(
                "name must be {}..={} characters, got {}",
                rules.name_min_len, rules.name_max_len, len
            )));
        }
        if !NAME_PATTERN.is_match(name) {
            return Err(WardenError::Validation(format!(
                "name '{}' may only contain letters, digits, '_', '-' and '.'",
                name
            )));
        }
        if self.description.trim().chars().count() < rules.min_description_len {
            return Err(WardenError::Validation(format!(
                "description must be at least {} characters",
                rules.min_description_len
            )));
        }
        validate_address(&self.address)?;
        if let Some(empty) = self.capabilities.iter().position(|c| c.trim().is_empty()) {
            return Err(WardenError::Validation(format!(
                "capability #{} is empty",
                empty
            )));
        }
        Ok(())
    }
}

/// Accepts `http(s)://` / `ws(s)://` URLs with a host, or a bare command line.
fn validate_address(address: &str) -> Result<()> {
    let address = address.trim();
    if address.is_empty() {
        return Err(WardenError::Validation("address must not be empty".to_string()));
    }
    if address.chars().any(char::is_control) {
        return Err(WardenError::Validation(
            "address contains control characters".to_string(),
        ));
    }
    if address.contains("://") {
        let url = url::Url::parse(address)
            .map_err(|e| WardenError::Validation(format!("malformed address '{}': {}", address, e)))?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(WardenError::Validation(format!(
                "unsupported address scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(WardenError::Validation(format!(
                "address '{}' has no host",
                address
            )));
        }
    }
    Ok(())
}

fn require_reason(reason: &str, action: &str) -> Result<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(WardenError::Validation(format!(
            "a non-empty reason is required to {} a tool",
            action
        )));
    }
    Ok(reason.to_string())
}

/// Result of one health check against a tool's server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSample {
    /// Round-trip time
    pub latency_ms: u64,
    /// Capabilities listed by the server; `None` if the check failed
    pub capability_count: Option<usize>,
}

impl HealthSample {
    /// A check that listed `capability_count` capabilities
    pub fn succeeded(latency_ms: u64, capability_count: usize) -> Self {
        Self {
            latency_ms,
            capability_count: Some(capability_count),
        }
    }

    /// A check that failed or timed out
    pub fn failed(latency_ms: u64) -> Self {
        Self {
            latency_ms,
            capability_count: None,
        }
    }

    /// Whether the server answered
    pub fn is_healthy(&self) -> bool {
        self.capability_count.is_some()
    }
}

/// The authoritative governance record of one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique id
    pub id: ToolId,
    /// Unique name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Server URL or command
    pub address: String,
    /// Advertised capability names
    pub capabilities: Vec<String>,
    /// Trust classification, fixed at proposal
    pub tier: ToolTier,
    /// Governing policy article
    pub constitutional_article: Option<String>,
    /// Lifecycle status
    pub status: ToolStatus,

    /// Proposing identity
    pub proposed_by: String,
    /// Proposal time
    pub proposed_at: DateTime<Utc>,
    /// Present iff approved
    pub approval: Option<ApprovalRecord>,
    /// Present iff revoked or disabled
    pub revocation: Option<RevocationRecord>,
    /// Present iff rejected
    pub rejection: Option<RejectionRecord>,

    /// Health signal
    pub health: HealthState,
    /// Last health check
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Round-trip time of the last health check
    #[serde(default)]
    pub last_health_latency_ms: Option<u64>,
    /// Capabilities the server listed at the last successful check
    #[serde(default)]
    pub discovered_capability_count: Option<usize>,
    /// Lifetime failures, never decreases
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,

    /// Invocations recorded
    pub usage_count: u64,
    /// Last invocation time
    pub last_used_at: Option<DateTime<Utc>>,

    /// Append-only invocation trail, oldest first
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,

    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl ToolDescriptor {
    /// Create a descriptor in `proposed` state.
    ///
    /// Name uniqueness is the store's concern; everything else is checked here.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Validation`] for malformed names, descriptions,
    /// addresses or capabilities.
    pub fn propose(proposal: ToolProposal, proposer: &str, rules: &GovernanceConfig) -> Result<Self> {
        proposal.validate(rules)?;

        let mut capabilities: Vec<String> = Vec::with_capacity(proposal.capabilities.len());
        for cap in proposal.capabilities {
            let cap = cap.trim().to_string();
            if !capabilities.contains(&cap) {
                capabilities.push(cap);
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: ToolId::new(),
            name: proposal.name.trim().to_string(),
            description: proposal.description.trim().to_string(),
            address: proposal.address.trim().to_string(),
            capabilities,
            tier: proposal.tier,
            constitutional_article: proposal
                .constitutional_article
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            status: ToolStatus::Proposed,
            proposed_by: proposer.to_string(),
            proposed_at: now,
            approval: None,
            revocation: None,
            rejection: None,
            health: HealthState::Unknown,
            last_health_check_at: None,
            last_health_latency_ms: None,
            discovered_capability_count: None,
            failure_count: 0,
            consecutive_failures: 0,
            usage_count: 0,
            last_used_at: None,
            audit_log: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// `proposed → approved`
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::InvalidTransition`] for forbidden-tier tools or
    /// when the tool is not `proposed`.
    pub fn approve(&mut self, approver: &str, reference: Option<String>) -> Result<()> {
        if self.tier == ToolTier::Forbidden {
            return Err(WardenError::InvalidTransition(format!(
                "tool '{}' is forbidden-tier and can never be approved",
                self.name
            )));
        }
        self.expect_status(ToolStatus::Proposed, "approve")?;

        let now = Utc::now();
        self.approval = Some(ApprovalRecord {
            approved_by: approver.to_string(),
            reference: reference.filter(|r| !r.trim().is_empty()),
            approved_at: now,
        });
        self.status = ToolStatus::Approved;
        self.updated_at = now;
        Ok(())
    }

    /// `proposed → rejected`
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Validation`] for an empty reason and
    /// [`WardenError::InvalidTransition`] when the tool is not `proposed`.
    pub fn reject(&mut self, rejecter: &str, reason: &str) -> Result<()> {
        let reason = require_reason(reason, "reject")?;
        self.expect_status(ToolStatus::Proposed, "reject")?;

        let now = Utc::now();
        self.rejection = Some(RejectionRecord {
            rejected_by: rejecter.to_string(),
            reason,
            rejected_at: now,
        });
        self.status = ToolStatus::Rejected;
        self.updated_at = now;
        Ok(())
    }

    /// `approved → revoked` (irreversible)
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Validation`] for an empty reason and
    /// [`WardenError::InvalidTransition`] when the tool is not `approved`.
    pub fn revoke(&mut self, revoker: &str, reason: &str) -> Result<()> {
        let reason = require_reason(reason, "revoke")?;
        self.expect_status(ToolStatus::Approved, "revoke")?;

        let now = Utc::now();
        self.approval = None;
        self.revocation = Some(RevocationRecord {
            revoked_by: revoker.to_string(),
            reason,
            revoked_at: now,
            suspended_approval: None,
        });
        self.status = ToolStatus::Revoked;
        self.updated_at = now;
        Ok(())
    }

    /// `approved → disabled`; the approval is kept aside for [`Self::enable`]
    ///
    /// # Errors
    ///
    /// Same as [`Self::revoke`].
    pub fn disable(&mut self, actor: &str, reason: &str) -> Result<()> {
        let reason = require_reason(reason, "disable")?;
        self.expect_status(ToolStatus::Approved, "disable")?;

        let now = Utc::now();
        self.revocation = Some(RevocationRecord {
            revoked_by: actor.to_string(),
            reason,
            revoked_at: now,
            suspended_approval: self.approval.take(),
        });
        self.status = ToolStatus::Disabled;
        self.updated_at = now;
        Ok(())
    }

    /// `disabled → approved`
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::InvalidTransition`] when the tool is not `disabled`.
    pub fn enable(&mut self, actor: &str) -> Result<()> {
        self.expect_status(ToolStatus::Disabled, "enable")?;
        if self.tier == ToolTier::Forbidden {
            return Err(WardenError::InvalidTransition(format!(
                "tool '{}' is forbidden-tier and can never be approved",
                self.name
            )));
        }

        let now = Utc::now();
        let suspended = self.revocation.take().and_then(|r| r.suspended_approval);
        self.approval = Some(suspended.unwrap_or_else(|| ApprovalRecord {
            approved_by: actor.to_string(),
            reference: None,
            approved_at: now,
        }));
        self.status = ToolStatus::Approved;
        self.updated_at = now;
        Ok(())
    }

    /// Record a health check. Touches health fields only, never lifecycle status.
    pub fn record_health(&mut self, sample: HealthSample, failure_threshold: u32) -> HealthState {
        let now = Utc::now();
        self.apply_outcome(sample.is_healthy(), failure_threshold);
        self.last_health_check_at = Some(now);
        self.last_health_latency_ms = Some(sample.latency_ms);
        if let Some(count) = sample.capability_count {
            self.discovered_capability_count = Some(count);
        }
        self.updated_at = now;
        self.health
    }

    /// Append an audit entry and update usage and failure counters
    pub fn record_invocation(&mut self, entry: AuditEntry, failure_threshold: u32) {
        self.apply_outcome(entry.outcome.is_success(), failure_threshold);
        self.usage_count += 1;
        self.last_used_at = Some(entry.timestamp);
        self.updated_at = entry.timestamp;
        self.audit_log.push(entry);
    }

    /// Most recent `limit` audit entries, newest first
    pub fn recent_audit(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit_log.iter().rev().take(limit).cloned().collect()
    }

    /// Whether the live registry may carry an entry for this tool
    pub fn is_projectable(&self) -> bool {
        self.status == ToolStatus::Approved && self.tier != ToolTier::Forbidden
    }

    fn apply_outcome(&mut self, success: bool, failure_threshold: u32) {
        if success {
            self.consecutive_failures = 0;
            self.health = HealthState::Healthy;
        } else {
            self.failure_count = self.failure_count.saturating_add(1);
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.health = if self.consecutive_failures >= failure_threshold.max(1) {
                HealthState::Down
            } else {
                HealthState::Degraded
            };
        }
    }

    fn expect_status(&self, expected: ToolStatus, action: &str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(WardenError::InvalidTransition(format!(
                "cannot {} tool '{}': status is {}, expected {}",
                action, self.name, self.status, expected
            )))
        }
    }
}
