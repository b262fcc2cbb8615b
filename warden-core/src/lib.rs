//! # Warden - Tool Governance for Agent Runtimes
//!
//! Warden decides which external tools agents may call and keeps the set of
//! callable tools in lockstep with that decision:
//! - Tool descriptors with a proposal → approval → revocation lifecycle
//! - A fixed risk-tier policy mapping each tool tier to the caller tiers
//!   allowed to invoke it
//! - Governed execution with fingerprinted audit entries and health tracking
//! - A live, concurrently readable registry of dispatchable tools
//! - A bridge that projects approved tools into that registry and removes
//!   them again on revoke or disable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = SimulatedConnector::new().with_server("npx search-server", ["search"]);
//!     let warden = Warden::in_memory(WardenConfig::default(), Arc::new(connector)).await?;
//!
//!     let admin = Actor::new("ops", ActorRole::Admin);
//!     let proposal = ToolProposal::new(
//!         "search",
//!         "Full-text search over the team wiki",
//!         "npx search-server",
//!         ToolTier::PreApproved,
//!     );
//!     let tool = warden.admin().propose(proposal, &admin).await?;
//!     warden.admin().approve(tool.id, &admin, None).await?;
//!
//!     let call = ToolCall::new(Caller::new("agent-7", CallerTier::Task), serde_json::json!({"q": "wal"}));
//!     let result = warden.dispatch("mcp__search", call).await;
//!     assert!(result.is_success());
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`governance`]: descriptors, tiers, the store and the governance service
//! - [`client`]: connectors for external tool servers
//! - [`registry`]: the live registry and its dispatcher
//! - [`bridge`]: governance → registry projection
//! - [`admin`]: the administrative facade used by outer layers
//! - [`runtime`]: startup wiring

pub mod admin;
pub mod bridge;
pub mod builtin;
pub mod client;
pub mod config;
pub mod error;
pub mod governance;
pub mod registry;
pub mod runtime;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admin::ToolAdmin;
    pub use crate::bridge::RegistryBridge;
    pub use crate::client::{SimulatedConnector, StdioConnector, ToolConnector, ToolSession};
    pub use crate::config::WardenConfig;
    pub use crate::error::{Result, WardenError};
    pub use crate::governance::{
        Actor, ActorRole, AuditView, Caller, CallerTier, ExecutionOutcome, ExecutionRequest,
        GovernanceService, HealthReport, HealthState, ToolDescriptor, ToolFilter, ToolId,
        ToolProposal, ToolStatus, ToolTier,
    };
    pub use crate::registry::{
        DispatchEnvelope, LiveRegistry, RegistryEntry, ToolCall, ToolError, ToolErrorKind,
        ToolHandle,
    };
    pub use crate::runtime::Warden;
}
