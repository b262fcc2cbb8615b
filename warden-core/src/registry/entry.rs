//! Live registry entries and their listing view

use super::handle::{ExecutionMode, ToolHandle};
use crate::governance::{CallerTier, CallerTierSet, ToolId, ToolTier};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Link from a projected entry back to its governance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceLink {
    /// Source descriptor id
    pub source_tool_id: ToolId,
    /// Source descriptor tier
    pub source_tier: ToolTier,
    /// Descriptor name before prefixing
    pub tool_name: String,
    /// Server address
    pub address: String,
}

/// One dispatchable entry. A projection, never authoritative.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Dispatch key
    pub key: String,
    /// What the tool does
    pub description: String,
    /// Declared parameter schema
    pub schema: Value,
    /// Implementation
    pub handle: ToolHandle,
    /// Caller tiers allowed to dispatch
    pub authorized: CallerTierSet,
    /// Present for governance-backed entries only
    pub linkage: Option<GovernanceLink>,
}

impl RegistryEntry {
    /// Create a built-in entry open to every caller tier
    pub fn new(key: impl Into<String>, description: impl Into<String>, handle: ToolHandle) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            schema: json!({"type": "object"}),
            handle,
            authorized: CallerTierSet::all(),
            linkage: None,
        }
    }

    /// Set the parameter schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Set the authorized caller tiers
    pub fn with_authorized(mut self, authorized: CallerTierSet) -> Self {
        self.authorized = authorized;
        self
    }

    /// Link to a governance record
    pub fn with_linkage(mut self, linkage: GovernanceLink) -> Self {
        self.linkage = Some(linkage);
        self
    }

    /// Built-ins have no governance linkage and are never revoked
    pub fn is_builtin(&self) -> bool {
        self.linkage.is_none()
    }

    /// Check whether a caller tier may dispatch this entry
    pub fn allows(&self, tier: CallerTier) -> bool {
        self.authorized.contains(tier)
    }

    /// Serializable view for listings
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key.clone(),
            description: self.description.clone(),
            schema: self.schema.clone(),
            mode: self.handle.mode(),
            authorized: self.authorized.iter().copied().collect(),
            governance: self.linkage.clone(),
            revocable: !self.is_builtin(),
        }
    }
}

/// What `list_for_tier` returns per entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    /// Dispatch key
    pub key: String,
    /// Description
    pub description: String,
    /// Parameter schema
    pub schema: Value,
    /// Declared execution mode
    pub mode: ExecutionMode,
    /// Authorized caller tiers, most privileged first
    pub authorized: Vec<CallerTier>,
    /// Governance metadata for projected entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceLink>,
    /// Whether governance can remove this entry
    pub revocable: bool,
}
