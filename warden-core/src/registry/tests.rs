//! Integration tests for the registry module

use super::*;
use crate::config::RegistryConfig;
use crate::governance::{Caller, CallerTier, CallerTierSet, ToolId, ToolTier};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct EchoFn;

#[async_trait]
impl AsyncToolFn for EchoFn {
    async fn call(&self, call: &ToolCall) -> Result<Value, ToolError> {
        Ok(call.params.clone())
    }
}

struct SleepyFn(Duration);

#[async_trait]
impl AsyncToolFn for SleepyFn {
    async fn call(&self, _call: &ToolCall) -> Result<Value, ToolError> {
        tokio::time::sleep(self.0).await;
        Ok(json!("woke"))
    }
}

fn registry(workers: usize, timeout: Duration) -> LiveRegistry {
    LiveRegistry::new(&RegistryConfig {
        external_prefix: "mcp__".to_string(),
        blocking_workers: workers,
        dispatch_timeout: timeout,
    })
}

fn call(tier: CallerTier) -> ToolCall {
    ToolCall::new(Caller::new("agent-1", tier), json!({"x": 1}))
}

fn governed(key: &str, tier: ToolTier) -> RegistryEntry {
    RegistryEntry::new(key, "governed test tool", ToolHandle::suspending(EchoFn))
        .with_authorized(tier.authorized_callers())
        .with_linkage(GovernanceLink {
            source_tool_id: ToolId::new(),
            source_tier: tier,
            tool_name: key.trim_start_matches("mcp__").to_string(),
            address: "npx test".to_string(),
        })
}

#[tokio::test]
async fn test_register_resolve_deregister() {
    let reg = registry(2, Duration::from_secs(5));
    reg.register(governed("mcp__search", ToolTier::PreApproved))
        .await
        .unwrap();
    assert!(reg.resolve("mcp__search").await.is_some());
    assert!(reg.deregister("mcp__search").await);
    assert!(reg.resolve("mcp__search").await.is_none());
    assert!(!reg.deregister("mcp__search").await);
}

#[tokio::test]
async fn test_register_is_upsert() {
    let reg = registry(2, Duration::from_secs(5));
    reg.register(governed("mcp__search", ToolTier::PreApproved))
        .await
        .unwrap();
    reg.register(
        governed("mcp__search", ToolTier::PreApproved).with_schema(json!({"type": "object", "v": 2})),
    )
    .await
    .unwrap();
    assert_eq!(reg.len().await, 1);
    assert_eq!(reg.resolve("mcp__search").await.unwrap().schema["v"], 2);
}

#[tokio::test]
async fn test_builtins_are_permanent() {
    let reg = registry(2, Duration::from_secs(5));
    reg.register(RegistryEntry::new("echo", "echo", ToolHandle::suspending(EchoFn)))
        .await
        .unwrap();

    assert!(!reg.deregister("echo").await);
    assert!(reg.resolve("echo").await.is_some());

    let err = reg.register(governed("echo", ToolTier::PreApproved)).await;
    assert!(err.is_err());
    assert!(reg.register(RegistryEntry::new("", "blank", ToolHandle::suspending(EchoFn))).await.is_err());
}

#[tokio::test]
async fn test_list_for_tier_filters_and_orders() {
    let reg = registry(2, Duration::from_secs(5));
    reg.register(governed("mcp__zeta", ToolTier::PreApproved)).await.unwrap();
    reg.register(governed("mcp__alpha", ToolTier::Restricted)).await.unwrap();
    reg.register(RegistryEntry::new("echo", "echo", ToolHandle::suspending(EchoFn)))
        .await
        .unwrap();

    let head: Vec<String> = reg
        .list_for_tier(CallerTier::Head)
        .await
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(head, vec!["echo", "mcp__alpha", "mcp__zeta"]);

    let task = reg.list_for_tier(CallerTier::Task).await;
    assert_eq!(task.len(), 2);
    let zeta = task.iter().find(|e| e.key == "mcp__zeta").unwrap();
    assert!(zeta.revocable);
    assert_eq!(zeta.governance.as_ref().unwrap().source_tier, ToolTier::PreApproved);
    assert_eq!(zeta.governance.as_ref().unwrap().tool_name, "zeta");
    let echo = task.iter().find(|e| e.key == "echo").unwrap();
    assert!(!echo.revocable);
    assert!(echo.governance.is_none());
}

#[tokio::test]
async fn test_dispatch_async_and_blocking() {
    let reg = registry(2, Duration::from_secs(5));
    reg.register(RegistryEntry::new("echo", "echo", ToolHandle::suspending(EchoFn)))
        .await
        .unwrap();
    reg.register(RegistryEntry::new(
        "double",
        "doubles x",
        ToolHandle::blocking_fn(|call: &ToolCall| {
            let x = call.params["x"].as_i64().unwrap_or(0);
            Ok(json!(x * 2))
        }),
    ))
    .await
    .unwrap();

    let echoed = reg
        .dispatch("echo", call(CallerTier::Task).with_trace_id("trace-1"))
        .await;
    assert!(echoed.is_success());
    assert_eq!(echoed.value().unwrap()["x"], 1);
    assert_eq!(echoed.provenance.trace_id.as_deref(), Some("trace-1"));

    let doubled = reg.dispatch("double", call(CallerTier::Lead)).await;
    assert_eq!(doubled.value(), Some(&json!(2)));
}

#[tokio::test]
async fn test_dispatch_failures_are_structured() {
    let reg = registry(1, Duration::from_secs(5));
    reg.register(governed("mcp__restricted", ToolTier::Restricted))
        .await
        .unwrap();
    reg.register(RegistryEntry::new(
        "fails",
        "always fails",
        ToolHandle::blocking_fn(|_: &ToolCall| Err(ToolError::upstream("server said no"))),
    ))
    .await
    .unwrap();
    reg.register(RegistryEntry::new(
        "panics",
        "panics",
        ToolHandle::blocking_fn(|_: &ToolCall| -> Result<Value, ToolError> { panic!("boom") }),
    ))
    .await
    .unwrap();

    let missing = reg.dispatch("nope", call(CallerTier::Head)).await;
    assert_eq!(missing.error_kind(), Some(ToolErrorKind::NotFound));

    let denied = reg.dispatch("mcp__restricted", call(CallerTier::Task)).await;
    assert_eq!(denied.error_kind(), Some(ToolErrorKind::PermissionDenied));
    assert!(denied.provenance.tool_id.is_some());

    let failed = reg.dispatch("fails", call(CallerTier::Head)).await;
    assert_eq!(failed.error_kind(), Some(ToolErrorKind::Upstream));

    let crashed = reg.dispatch("panics", call(CallerTier::Head)).await;
    assert_eq!(crashed.error_kind(), Some(ToolErrorKind::Internal));

    // the pool survives a crashed job
    let again = reg.dispatch("fails", call(CallerTier::Head)).await;
    assert_eq!(again.error_kind(), Some(ToolErrorKind::Upstream));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_timeout() {
    let reg = registry(1, Duration::from_millis(100));
    reg.register(RegistryEntry::new(
        "slow",
        "slow",
        ToolHandle::suspending(SleepyFn(Duration::from_secs(10))),
    ))
    .await
    .unwrap();

    let result = reg.dispatch("slow", call(CallerTier::Head)).await;
    assert_eq!(result.error_kind(), Some(ToolErrorKind::Timeout));
    assert!(result.get_error().unwrap().kind.is_retryable());
}

#[tokio::test]
async fn test_dispatch_cancellation() {
    let reg = registry(1, Duration::from_secs(30));
    reg.register(RegistryEntry::new(
        "slow",
        "slow",
        ToolHandle::suspending(SleepyFn(Duration::from_secs(10))),
    ))
    .await
    .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let result = reg
        .dispatch("slow", call(CallerTier::Head).with_cancellation(token.clone()))
        .await;
    assert!(result.is_cancelled());

    let already = reg
        .dispatch("slow", call(CallerTier::Head).with_cancellation(token))
        .await;
    assert!(already.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_tool_does_not_stall_async_dispatch() {
    let reg = Arc::new(registry(1, Duration::from_secs(5)));
    reg.register(RegistryEntry::new(
        "grind",
        "blocks a thread",
        ToolHandle::blocking_fn(|_: &ToolCall| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(json!("done"))
        }),
    ))
    .await
    .unwrap();
    reg.register(RegistryEntry::new("echo", "echo", ToolHandle::suspending(EchoFn)))
        .await
        .unwrap();

    let grinding = {
        let reg = Arc::clone(&reg);
        tokio::spawn(async move { reg.dispatch("grind", call(CallerTier::Head)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = std::time::Instant::now();
    let echoed = reg.dispatch("echo", call(CallerTier::Head)).await;
    assert!(echoed.is_success());
    assert!(started.elapsed() < Duration::from_millis(300));

    assert!(grinding.await.unwrap().is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_never_tear() {
    let reg = Arc::new(registry(2, Duration::from_secs(5)));
    reg.register(governed("mcp__flip", ToolTier::PreApproved)).await.unwrap();

    let writer = {
        let reg = Arc::clone(&reg);
        tokio::spawn(async move {
            for i in 0..200 {
                let entry = governed("mcp__flip", ToolTier::PreApproved)
                    .with_schema(json!({"gen": i}))
                    .with_authorized(CallerTierSet::all());
                reg.register(entry).await.unwrap();
            }
        })
    };
    let reader = {
        let reg = Arc::clone(&reg);
        tokio::spawn(async move {
            for _ in 0..200 {
                let entry = reg.resolve("mcp__flip").await.expect("always present");
                assert_eq!(entry.key, "mcp__flip");
                assert!(entry.linkage.is_some());
            }
        })
    };
    writer.await.unwrap();
    reader.await.unwrap();
}
