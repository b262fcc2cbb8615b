//! Built-in tools registered once at startup
//!
//! These have no governance record and are never revoked at runtime; they
//! go through the same tier gate as governed tools.

use crate::error::Result;
use crate::governance::{CallerTier, CallerTierSet};
use crate::registry::{AsyncToolFn, LiveRegistry, RegistryEntry, ToolCall, ToolError, ToolErrorKind, ToolHandle};
use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Returns its `message` argument
pub struct EchoTool;

#[async_trait]
impl AsyncToolFn for EchoTool {
    async fn call(&self, call: &ToolCall) -> std::result::Result<Value, ToolError> {
        let message = call
            .params
            .get("message")
            .cloned()
            .ok_or_else(|| validation("message is required"))?;
        Ok(json!({ "message": message }))
    }
}

fn validation(message: &str) -> ToolError {
    ToolError::new(ToolErrorKind::Validation, message).with_code("VALIDATION_FAILED")
}

fn read_file(call: &ToolCall) -> std::result::Result<Value, ToolError> {
    let path = call
        .params
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| validation("path must be a string"))?;
    let limit = match call.params.get("limit") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| validation("limit must be a non-negative integer"))?,
        ),
    };

    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ToolError::new(ToolErrorKind::NotFound, format!("{}: {}", path, e))
        }
        std::io::ErrorKind::PermissionDenied => {
            ToolError::new(ToolErrorKind::PermissionDenied, format!("{}: {}", path, e))
        }
        _ => ToolError::internal(format!("failed to read {}: {}", path, e)),
    })?;

    let total_chars = content.chars().count();
    let (content, truncated) = match limit {
        Some(limit) if limit < total_chars => (content.chars().take(limit).collect(), true),
        _ => (content, false),
    };
    Ok(json!({
        "path": path,
        "content": content,
        "truncated": truncated,
        "total_chars": total_chars,
    }))
}

fn sha256(call: &ToolCall) -> std::result::Result<Value, ToolError> {
    let text = call
        .params
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| validation("text must be a string"))?;
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(json!({ "sha256": hex }))
}

/// The built-in entries, in registration order
pub fn builtin_entries() -> Vec<RegistryEntry> {
    vec![
        RegistryEntry::new("echo", "Echo a message back", ToolHandle::suspending(EchoTool))
            .with_schema(json!({
                "type": "object",
                "properties": { "message": {} },
                "required": ["message"],
            })),
        RegistryEntry::new(
            "read_file",
            "Read a UTF-8 text file, optionally truncated to `limit` characters",
            ToolHandle::blocking_fn(read_file),
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer", "minimum": 0 },
            },
            "required": ["path"],
        }))
        .with_authorized(CallerTierSet::from_tiers([
            CallerTier::Head,
            CallerTier::Council,
            CallerTier::Lead,
        ])),
        RegistryEntry::new("sha256", "SHA-256 hex digest of a string", ToolHandle::blocking_fn(sha256))
            .with_schema(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })),
    ]
}

/// Register every built-in; returns how many were registered
///
/// # Errors
///
/// Propagates registry validation failures.
pub async fn register_builtins(registry: &LiveRegistry) -> Result<usize> {
    let entries = builtin_entries();
    let count = entries.len();
    for entry in entries {
        registry.register(entry).await?;
    }
    tracing::debug!(count, "Built-in tools registered");
    Ok(count)
}
