//! Live registry and dispatcher
//!
//! The restart-volatile projection every agent call consults. Built-in tools
//! are registered once at startup; governance-backed entries are written only
//! by the [`RegistryBridge`](crate::bridge::RegistryBridge).

mod entry;
mod handle;
mod live;
pub mod result;

pub use entry::{EntrySummary, GovernanceLink, RegistryEntry};
pub use handle::{AsyncToolFn, BlockingToolFn, ExecutionMode, ToolCall, ToolHandle};
pub use live::LiveRegistry;
pub use result::{DispatchEnvelope, DispatchProvenance, DispatchResult, ToolError, ToolErrorKind};

#[cfg(test)]
mod tests;
