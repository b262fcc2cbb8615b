//! Error types for Warden operations
//!
//! Errors here form the *raised* channel: caller mistakes and rule violations
//! that must reach the immediate caller. Failures of external tools travel
//! the *returned* channel instead (see [`crate::registry::ToolError`] and
//! [`crate::governance::ExecutionOutcome`]).

/// Result type for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Error types for the Warden governance core
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Malformed input (caller's fault, never retried automatically)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown tool id or name
    #[error("Not found: {0}")]
    NotFound(String),

    /// A tool with this name already exists
    #[error("Tool name already in use: {0}")]
    DuplicateName(String),

    /// Lifecycle or tier rule violation
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Caller tier or role insufficient, or missing approval token
    #[error("Permission denied: {0}")]
    Permission(String),

    /// External tool could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// External tool call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Persisted store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Stable snake_case code for the outer API layer
    pub fn kind(&self) -> &'static str {
        match self {
            WardenError::Validation(_) => "validation",
            WardenError::NotFound(_) => "not_found",
            WardenError::DuplicateName(_) => "duplicate_name",
            WardenError::InvalidTransition(_) => "invalid_transition",
            WardenError::Permission(_) => "permission",
            WardenError::Connection(_) => "connection",
            WardenError::Timeout(_) => "timeout",
            WardenError::Storage(_) => "storage",
            WardenError::Configuration(_) => "configuration",
            WardenError::Serialization(_) => "serialization",
            WardenError::Io(_) => "io",
        }
    }

    /// Whether the caller caused this error (as opposed to an operational failure)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WardenError::Validation(_)
                | WardenError::NotFound(_)
                | WardenError::DuplicateName(_)
                | WardenError::InvalidTransition(_)
                | WardenError::Permission(_)
        )
    }
}
