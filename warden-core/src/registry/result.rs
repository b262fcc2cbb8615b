//! Structured dispatch results
//!
//! Every [`LiveRegistry::dispatch`](super::LiveRegistry::dispatch) returns a
//! [`DispatchEnvelope`]: failures are data, never panics or raised errors, so
//! a caller issuing several tool calls in a loop cannot be derailed by one.

use crate::error::WardenError;
use crate::governance::{CallerTier, ToolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Current schema version for dispatch envelopes
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Result of one dispatch plus where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    /// Schema version for forward compatibility
    pub schema_version: u32,

    /// Status and payload
    pub result: DispatchResult,

    /// Correlation metadata
    pub provenance: DispatchProvenance,
}

impl DispatchEnvelope {
    /// A successful dispatch
    pub fn success(value: Value, provenance: DispatchProvenance) -> Self {
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            result: DispatchResult::Success { value },
            provenance,
        }
    }

    /// A failed dispatch
    pub fn error(error: ToolError, provenance: DispatchProvenance) -> Self {
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            result: DispatchResult::Error { error },
            provenance,
        }
    }

    /// A cancelled dispatch
    pub fn cancelled(reason: impl Into<String>, provenance: DispatchProvenance) -> Self {
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            result: DispatchResult::Cancelled {
                reason: reason.into(),
            },
            provenance,
        }
    }

    /// Check if this dispatch succeeded
    pub fn is_success(&self) -> bool {
        matches!(self.result, DispatchResult::Success { .. })
    }

    /// Check if this dispatch was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, DispatchResult::Cancelled { .. })
    }

    /// Get the value if successful
    pub fn value(&self) -> Option<&Value> {
        match &self.result {
            DispatchResult::Success { value } => Some(value),
            _ => None,
        }
    }

    /// Get the error if failed
    pub fn get_error(&self) -> Option<&ToolError> {
        match &self.result {
            DispatchResult::Error { error } => Some(error),
            _ => None,
        }
    }

    /// Error kind if failed
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.get_error().map(|e| e.kind)
    }
}

/// Dispatch status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResult {
    /// Tool ran and succeeded
    Success {
        /// Tool output
        value: Value,
    },

    /// Dispatch or tool failed
    Error {
        /// Structured error
        error: ToolError,
    },

    /// Cancelled by the caller
    Cancelled {
        /// Why
        reason: String,
    },
}

/// Structured dispatch error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    /// Error kind (determines retryability)
    pub kind: ToolErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Stable machine-readable code
    pub code: Option<String>,

    /// Suggested retry delay for retryable errors
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_millis"
    )]
    pub retry_after: Option<Duration>,
}

impl ToolError {
    /// Create a new tool error
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            retry_after: None,
        }
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Unknown dispatch key
    pub fn not_found(key: &str) -> Self {
        Self::new(ToolErrorKind::NotFound, format!("no tool registered as '{}'", key))
            .with_code("NOT_FOUND")
    }

    /// Caller tier not in the entry's authorized set
    pub fn tier_denied(key: &str, tier: CallerTier) -> Self {
        Self::new(
            ToolErrorKind::PermissionDenied,
            format!("caller tier {} may not invoke '{}'", tier, key),
        )
        .with_code("TIER_DENIED")
    }

    /// Dispatch exceeded its deadline
    pub fn timeout(duration: Duration) -> Self {
        Self {
            kind: ToolErrorKind::Timeout,
            message: format!("dispatch timed out after {:?}", duration),
            code: Some("TIMEOUT".to_string()),
            retry_after: Some(Duration::from_secs(1)),
        }
    }

    /// External tool reported or suffered a failure
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Upstream, message).with_code("UPSTREAM_FAILURE")
    }

    /// Handle crashed or misbehaved
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message).with_code("INTERNAL_ERROR")
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<WardenError> for ToolError {
    fn from(err: WardenError) -> Self {
        let kind = match &err {
            WardenError::Validation(_) | WardenError::Serialization(_) => ToolErrorKind::Validation,
            WardenError::NotFound(_) => ToolErrorKind::NotFound,
            WardenError::Permission(_) => ToolErrorKind::PermissionDenied,
            WardenError::InvalidTransition(_) | WardenError::DuplicateName(_) => {
                ToolErrorKind::InvalidTransition
            }
            WardenError::Timeout(_) => ToolErrorKind::Timeout,
            WardenError::Connection(_) => ToolErrorKind::Upstream,
            WardenError::Storage(_) | WardenError::Configuration(_) | WardenError::Io(_) => {
                ToolErrorKind::Internal
            }
        };
        Self::new(kind, err.to_string()).with_code(err.kind().to_uppercase())
    }
}

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Malformed arguments (not retryable)
    Validation,

    /// Unknown key, or tool gone from governance (not retryable)
    NotFound,

    /// Caller tier, role or approval token insufficient (not retryable)
    PermissionDenied,

    /// Tool not in a callable lifecycle state (not retryable)
    InvalidTransition,

    /// Deadline exceeded (retryable)
    Timeout,

    /// External tool failed or was unreachable (retryable)
    Upstream,

    /// Bug or infrastructure failure (not retryable)
    Internal,

    /// Cancelled by the caller (not retryable)
    Cancelled,
}

impl ToolErrorKind {
    /// Get the string name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Validation => "validation",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::PermissionDenied => "permission_denied",
            ToolErrorKind::InvalidTransition => "invalid_transition",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Upstream => "upstream",
            ToolErrorKind::Internal => "internal",
            ToolErrorKind::Cancelled => "cancelled",
        }
    }

    /// Check if this error kind is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolErrorKind::Timeout | ToolErrorKind::Upstream)
    }
}

/// Correlation metadata for one dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchProvenance {
    /// Dispatch key
    pub key: String,

    /// Governed tool behind the key, if any
    pub tool_id: Option<ToolId>,

    /// Invoking agent
    pub caller_id: String,

    /// Invoking agent's tier
    pub caller_tier: CallerTier,

    /// Request/trace id for correlation
    pub trace_id: Option<String>,

    /// When dispatch started
    pub started_at: DateTime<Utc>,

    /// Dispatch duration
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl DispatchProvenance {
    /// Create provenance stamped now
    pub fn new(key: impl Into<String>, caller_id: impl Into<String>, caller_tier: CallerTier) -> Self {
        Self {
            key: key.into(),
            tool_id: None,
            caller_id: caller_id.into(),
            caller_tier,
            trace_id: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Set the governed tool id
    pub fn with_tool_id(mut self, tool_id: Option<ToolId>) -> Self {
        self.tool_id = tool_id;
        self
    }

    /// Set trace ID
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
