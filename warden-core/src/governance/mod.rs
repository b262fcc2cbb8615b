//! Tool governance
//!
//! The authoritative, persisted side of the system:
//! - [`tier`]: tool tiers, caller tiers and the fixed authorization table
//! - [`descriptor`]: the tool record and its lifecycle state machine
//! - [`store`]: persistence backends
//! - [`service`]: the governance service that funnels every mutation

pub mod descriptor;
pub mod fingerprint;
pub mod service;
pub mod store;
pub mod tier;

pub use descriptor::{
    ApprovalRecord, AuditEntry, AuditOutcome, HealthSample, HealthState, RejectionRecord,
    RevocationRecord,
    ToolDescriptor, ToolId, ToolProposal, ToolStatus,
};
pub use fingerprint::fingerprint_params;
pub use service::{AuditView, ExecutionOutcome, ExecutionRequest, GovernanceService, HealthReport};
pub use store::{FileToolStore, InMemoryToolStore, ToolFilter, ToolMutation, ToolStore};
pub use tier::{Actor, ActorRole, Caller, CallerTier, CallerTierSet, ToolTier};

#[cfg(test)]
mod tests;
