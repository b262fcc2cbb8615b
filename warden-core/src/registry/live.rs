//! The live registry: name → entry table consulted on every tool call
//!
//! Entries are stored behind `Arc` and swapped whole, so `register`,
//! `deregister` and `resolve` on one key never observe a half-written entry.
//! Blocking handles run on a bounded pool (a semaphore in front of
//! `spawn_blocking`) so they cannot starve suspending dispatches.

use super::entry::{EntrySummary, RegistryEntry};
use super::handle::{ToolCall, ToolHandle};
use super::result::{DispatchEnvelope, DispatchProvenance, ToolError, ToolErrorKind};
use crate::config::RegistryConfig;
use crate::error::{Result, WardenError};
use crate::governance::CallerTier;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::timeout;

/// In-memory table of dispatchable tools
pub struct LiveRegistry {
    entries: RwLock<BTreeMap<String, Arc<RegistryEntry>>>,
    workers: Arc<Semaphore>,
    dispatch_timeout: Duration,
}

impl LiveRegistry {
    /// Create an empty registry
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            workers: Arc::new(Semaphore::new(config.blocking_workers.max(1))),
            dispatch_timeout: config.dispatch_timeout,
        }
    }

    /// Insert or atomically replace the entry under `entry.key`.
    ///
    /// # Errors
    ///
    /// [`WardenError::Validation`] for an empty key, or when a governed entry
    /// would replace a built-in (or the reverse).
    pub async fn register(&self, entry: RegistryEntry) -> Result<()> {
        if entry.key.trim().is_empty() {
            return Err(WardenError::Validation("registry key must not be empty".to_string()));
        }

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&entry.key) {
            if existing.is_builtin() != entry.is_builtin() {
                return Err(WardenError::Validation(format!(
                    "key '{}' is already taken by a {} entry",
                    entry.key,
                    if existing.is_builtin() { "built-in" } else { "governed" }
                )));
            }
        }

        tracing::debug!(
            key = %entry.key,
            mode = ?entry.handle.mode(),
            builtin = entry.is_builtin(),
            "Registry entry registered"
        );
        entries.insert(entry.key.clone(), Arc::new(entry));
        Ok(())
    }

    /// Look up an entry
    pub async fn resolve(&self, key: &str) -> Option<Arc<RegistryEntry>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Entries the tier may dispatch, ordered by key
    pub async fn list_for_tier(&self, tier: CallerTier) -> Vec<EntrySummary> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.allows(tier))
            .map(|e| e.summary())
            .collect()
    }

    /// All keys, ordered
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Keys of governance-backed entries
    pub async fn governed_keys(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_builtin())
            .map(|e| e.key.clone())
            .collect()
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove a governance-backed entry. Built-ins are never removed.
    pub async fn deregister(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_builtin() => {
                tracing::warn!(key = %key, "Refusing to deregister built-in tool");
                false
            }
            Some(_) => {
                entries.remove(key);
                tracing::debug!(key = %key, "Registry entry deregistered");
                true
            }
            None => false,
        }
    }

    /// Resolve, tier-check and run a tool.
    ///
    /// Never fails: unknown keys, denied tiers, tool errors, timeouts, panics
    /// and cancellation all come back as a structured envelope.
    pub async fn dispatch(&self, key: &str, call: ToolCall) -> DispatchEnvelope {
        let started = Instant::now();
        let provenance = DispatchProvenance::new(key, call.caller.id.clone(), call.caller.tier)
            .with_trace_id(call.trace_id.clone());

        if call.is_cancelled() {
            return DispatchEnvelope::cancelled("cancelled before dispatch", provenance);
        }

        let Some(entry) = self.resolve(key).await else {
            tracing::debug!(key = %key, caller = %call.caller.id, "Dispatch to unknown key");
            return DispatchEnvelope::error(ToolError::not_found(key), provenance);
        };
        let provenance =
            provenance.with_tool_id(entry.linkage.as_ref().map(|l| l.source_tool_id));

        if !entry.allows(call.caller.tier) {
            tracing::warn!(
                key = %key,
                caller = %call.caller.id,
                tier = %call.caller.tier,
                "Dispatch denied for caller tier"
            );
            return DispatchEnvelope::error(ToolError::tier_denied(key, call.caller.tier), provenance);
        }

        let cancellation = call.cancellation.clone();
        let execution = self.run_handle(entry.handle.clone(), call);

        let result = if let Some(token) = cancellation {
            tokio::select! {
                _ = token.cancelled() => {
                    Err(ToolError::new(ToolErrorKind::Cancelled, "dispatch cancelled"))
                }
                res = timeout(self.dispatch_timeout, execution) => {
                    res.unwrap_or_else(|_| Err(ToolError::timeout(self.dispatch_timeout)))
                }
            }
        } else {
            timeout(self.dispatch_timeout, execution)
                .await
                .unwrap_or_else(|_| Err(ToolError::timeout(self.dispatch_timeout)))
        };

        let provenance = provenance.with_duration(started.elapsed());
        match result {
            Ok(value) => DispatchEnvelope::success(value, provenance),
            Err(error) if error.kind == ToolErrorKind::Cancelled => {
                DispatchEnvelope::cancelled(error.message, provenance)
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "Dispatch failed");
                DispatchEnvelope::error(error, provenance)
            }
        }
    }

    async fn run_handle(&self, handle: ToolHandle, call: ToolCall) -> std::result::Result<Value, ToolError> {
        match handle {
            ToolHandle::Async(f) => f.call(&call).await,
            ToolHandle::Blocking(f) => {
                // Held until the job finishes, even if the dispatch times out.
                let permit = Arc::clone(&self.workers)
                    .acquire_owned()
                    .await
                    .map_err(|_| ToolError::internal("worker pool closed"))?;
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f.call(&call)
                })
                .await
                .map_err(|e| ToolError::internal(format!("blocking tool crashed: {}", e)))?
            }
        }
    }
}
