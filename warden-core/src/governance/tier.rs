//! Trust tiers, caller tiers, and the fixed authorization table
//!
//! A tool's [`ToolTier`] is its governance classification; a [`CallerTier`]
//! is the privilege level of the agent invoking it. The mapping between the
//! two is a fixed policy table and is not configurable at runtime.

use crate::error::WardenError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Governance trust classification of a tool, fixed at proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    /// Safe, read-only; callable by every caller tier once approved
    PreApproved,

    /// Side-effectful; two most-privileged tiers only, with a per-call approval token
    Restricted,

    /// Never callable, never approvable, never projected
    Forbidden,
}

impl ToolTier {
    /// Get all tiers
    pub fn all() -> &'static [ToolTier] {
        &[ToolTier::PreApproved, ToolTier::Restricted, ToolTier::Forbidden]
    }

    /// Get the string name of this tier
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolTier::PreApproved => "pre_approved",
            ToolTier::Restricted => "restricted",
            ToolTier::Forbidden => "forbidden",
        }
    }

    /// Caller tiers authorized to invoke a tool of this tier
    pub fn authorized_callers(&self) -> CallerTierSet {
        match self {
            ToolTier::PreApproved => CallerTierSet::all(),
            ToolTier::Restricted => {
                CallerTierSet::from_tiers([CallerTier::Head, CallerTier::Council])
            }
            ToolTier::Forbidden => CallerTierSet::new(),
        }
    }

    /// Whether each invocation needs a human approval token
    pub fn requires_approval_token(&self) -> bool {
        matches!(self, ToolTier::Restricted)
    }
}

impl std::fmt::Display for ToolTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolTier {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pre_approved" => Ok(ToolTier::PreApproved),
            "restricted" => Ok(ToolTier::Restricted),
            "forbidden" => Ok(ToolTier::Forbidden),
            other => Err(WardenError::Validation(format!(
                "unknown tier '{}': expected pre_approved, restricted or forbidden",
                other
            ))),
        }
    }
}

/// Privilege level of an invoking agent, most privileged first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallerTier {
    /// Head of the hierarchy (`0xxxx`)
    #[serde(rename = "0xxxx")]
    Head,

    /// Council members (`1xxxx`)
    #[serde(rename = "1xxxx")]
    Council,

    /// Lead agents (`2xxxx`)
    #[serde(rename = "2xxxx")]
    Lead,

    /// Task agents (`3xxxx`)
    #[serde(rename = "3xxxx")]
    Task,
}

impl CallerTier {
    /// Get all caller tiers
    pub fn all() -> &'static [CallerTier] {
        &[
            CallerTier::Head,
            CallerTier::Council,
            CallerTier::Lead,
            CallerTier::Task,
        ]
    }

    /// Wire label of this tier
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerTier::Head => "0xxxx",
            CallerTier::Council => "1xxxx",
            CallerTier::Lead => "2xxxx",
            CallerTier::Task => "3xxxx",
        }
    }
}

impl std::fmt::Display for CallerTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CallerTier {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0xxxx" | "0" | "head" => Ok(CallerTier::Head),
            "1xxxx" | "1" | "council" => Ok(CallerTier::Council),
            "2xxxx" | "2" | "lead" => Ok(CallerTier::Lead),
            "3xxxx" | "3" | "task" => Ok(CallerTier::Task),
            other => Err(WardenError::Validation(format!(
                "unknown caller tier '{}'",
                other
            ))),
        }
    }
}

/// A set of caller tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerTierSet {
    tiers: BTreeSet<CallerTier>,
}

impl CallerTierSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding every caller tier
    pub fn all() -> Self {
        Self::from_tiers(CallerTier::all().iter().copied())
    }

    /// Create a set from an iterator of tiers
    pub fn from_tiers(iter: impl IntoIterator<Item = CallerTier>) -> Self {
        Self {
            tiers: iter.into_iter().collect(),
        }
    }

    /// Check if a tier is present
    pub fn contains(&self, tier: CallerTier) -> bool {
        self.tiers.contains(&tier)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterate from most to least privileged
    pub fn iter(&self) -> impl Iterator<Item = &CallerTier> {
        self.tiers.iter()
    }
}

impl FromIterator<CallerTier> for CallerTierSet {
    fn from_iter<T: IntoIterator<Item = CallerTier>>(iter: T) -> Self {
        Self::from_tiers(iter)
    }
}

/// Role of an actor performing a lifecycle mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Highest human authority
    Sovereign,

    /// Administrator
    Admin,

    /// Any other authenticated actor
    Member,
}

impl ActorRole {
    /// Whether this role may approve, reject, revoke, disable or enable tools
    pub fn can_govern(&self) -> bool {
        matches!(self, ActorRole::Sovereign | ActorRole::Admin)
    }

    /// Get the string name of this role
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Sovereign => "sovereign",
            ActorRole::Admin => "admin",
            ActorRole::Member => "member",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sovereign" => Ok(ActorRole::Sovereign),
            "admin" => Ok(ActorRole::Admin),
            "member" => Ok(ActorRole::Member),
            other => Err(WardenError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Identity performing a lifecycle mutation, as supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor identifier
    pub id: String,

    /// Actor role
    pub role: ActorRole,
}

impl Actor {
    /// Create a new actor
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub(crate) fn require_governing(&self, action: &str) -> crate::error::Result<()> {
        if self.role.can_govern() {
            Ok(())
        } else {
            Err(WardenError::Permission(format!(
                "role '{}' of '{}' may not {} tools",
                self.role, self.id, action
            )))
        }
    }
}

/// Identity invoking a tool, as supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Caller identifier
    pub id: String,

    /// Caller privilege tier
    pub tier: CallerTier,
}

impl Caller {
    /// Create a new caller
    pub fn new(id: impl Into<String>, tier: CallerTier) -> Self {
        Self {
            id: id.into(),
            tier,
        }
    }
}
