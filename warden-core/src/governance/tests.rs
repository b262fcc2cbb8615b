//! Integration tests for the governance module

use super::*;
use crate::client::{Fault, SimulatedConnector};
use crate::config::{AdapterConfig, GovernanceConfig};
use crate::error::WardenError;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SEARCH_ADDR: &str = "https://search.example.com/mcp";

fn admin() -> Actor {
    Actor::new("admin-1", ActorRole::Admin)
}

fn member() -> Actor {
    Actor::new("member-1", ActorRole::Member)
}

fn service_with(connector: SimulatedConnector) -> GovernanceService {
    let adapter = AdapterConfig {
        connect_timeout: Duration::from_millis(100),
        invoke_timeout: Duration::from_millis(100),
        health_timeout: Duration::from_millis(50),
    };
    GovernanceService::new(
        Arc::new(InMemoryToolStore::new()),
        Arc::new(connector),
        GovernanceConfig::default(),
        adapter,
    )
}

fn service() -> GovernanceService {
    service_with(SimulatedConnector::new().with_server(SEARCH_ADDR, ["search"]))
}

fn search_proposal(tier: ToolTier) -> ToolProposal {
    ToolProposal::new("search", "Searches the public web index", SEARCH_ADDR, tier)
}

async fn approved(svc: &GovernanceService, proposal: ToolProposal) -> ToolDescriptor {
    let tool = svc.propose_tool(proposal, &member()).await.unwrap();
    svc.approve_tool(tool.id, &admin(), Some("vote-1".into()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_propose_and_duplicate() {
    let svc = service();
    let tool = svc
        .propose_tool(search_proposal(ToolTier::PreApproved), &member())
        .await
        .unwrap();
    assert_eq!(tool.status, ToolStatus::Proposed);
    assert_eq!(tool.proposed_by, "member-1");

    let err = svc
        .propose_tool(search_proposal(ToolTier::Restricted), &member())
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::DuplicateName(_)));
}

#[tokio::test]
async fn test_lifecycle_requires_governing_role() {
    let svc = service();
    let tool = svc
        .propose_tool(search_proposal(ToolTier::PreApproved), &member())
        .await
        .unwrap();

    let err = svc.approve_tool(tool.id, &member(), None).await.unwrap_err();
    assert!(matches!(err, WardenError::Permission(_)));
    assert_eq!(svc.get_tool(tool.id).await.unwrap().status, ToolStatus::Proposed);

    let sovereign = Actor::new("root", ActorRole::Sovereign);
    assert!(svc.approve_tool(tool.id, &sovereign, None).await.is_ok());
}

#[tokio::test]
async fn test_unknown_ids() {
    let svc = service();
    let id = ToolId::new();
    assert!(matches!(svc.get_tool(id).await, Err(WardenError::NotFound(_))));
    assert!(matches!(
        svc.approve_tool(id, &admin(), None).await,
        Err(WardenError::NotFound(_))
    ));
    assert!(matches!(
        svc.audit_log(id, Some(5)).await,
        Err(WardenError::NotFound(_))
    ));
    assert!(matches!(
        svc.check_health(id).await,
        Err(WardenError::NotFound(_))
    ));
    let request = ExecutionRequest::new(id, Caller::new("a", CallerTier::Head), json!({}));
    assert!(matches!(
        svc.authorize_and_execute(request).await,
        Err(WardenError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_forbidden_cannot_be_approved() {
    let svc = service();
    let tool = svc
        .propose_tool(search_proposal(ToolTier::Forbidden), &member())
        .await
        .unwrap();
    let err = svc.approve_tool(tool.id, &admin(), None).await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidTransition(_)));
    assert!(svc.approved_tools().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pre_approved_callable_by_every_tier() {
    let connector = SimulatedConnector::new().with_server(SEARCH_ADDR, ["search"]);
    let svc = service_with(connector.clone());
    let tool = approved(&svc, search_proposal(ToolTier::PreApproved)).await;

    for tier in CallerTier::all() {
        let request = ExecutionRequest::new(
            tool.id,
            Caller::new(format!("agent-{}", tier), *tier),
            json!({"q": "rust"}),
        );
        let outcome = svc.authorize_and_execute(request).await.unwrap();
        assert!(outcome.success, "{} should succeed", tier);
        assert_eq!(outcome.capability, "search");
    }

    let tool = svc.get_tool(tool.id).await.unwrap();
    assert_eq!(tool.usage_count, 4);
    assert_eq!(tool.audit_log.len(), 4);
    assert_eq!(connector.calls().len(), 4);
}

#[tokio::test]
async fn test_unapproved_execution_fails_before_adapter() {
    let connector = SimulatedConnector::new();
    let svc = service_with(connector.clone());
    let tool = svc
        .propose_tool(search_proposal(ToolTier::PreApproved), &member())
        .await
        .unwrap();

    let request = ExecutionRequest::new(tool.id, Caller::new("h", CallerTier::Head), json!({}));
    let err = svc.authorize_and_execute(request).await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidTransition(_)));
    assert_eq!(connector.connect_count(), 0);
    assert!(svc.get_tool(tool.id).await.unwrap().audit_log.is_empty());
}

#[tokio::test]
async fn test_restricted_tool_gates() {
    let connector = SimulatedConnector::new();
    let svc = service_with(connector.clone());
    let proposal = ToolProposal::new(
        "delete_all",
        "Deletes every record in the scratch space",
        "npx scratch-server",
        ToolTier::Restricted,
    );
    let tool = approved(&svc, proposal).await;
    let params = json!({"scope": "scratch", "secret": "s3cr3t"});

    let low = ExecutionRequest::new(tool.id, Caller::new("t", CallerTier::Task), params.clone())
        .with_approval_token(true);
    assert!(matches!(
        svc.authorize_and_execute(low).await,
        Err(WardenError::Permission(_))
    ));

    let lead = ExecutionRequest::new(tool.id, Caller::new("l", CallerTier::Lead), params.clone())
        .with_approval_token(true);
    assert!(matches!(
        svc.authorize_and_execute(lead).await,
        Err(WardenError::Permission(_))
    ));

    for tier in [CallerTier::Head, CallerTier::Council] {
        let no_token = ExecutionRequest::new(tool.id, Caller::new("c", tier), params.clone());
        assert!(matches!(
            svc.authorize_and_execute(no_token).await,
            Err(WardenError::Permission(_))
        ));
    }
    assert_eq!(connector.connect_count(), 0);

    let ok = ExecutionRequest::new(tool.id, Caller::new("c", CallerTier::Council), params.clone())
        .with_approval_token(true);
    let outcome = svc.authorize_and_execute(ok).await.unwrap();
    assert!(outcome.success);

    let log = svc.audit_log(tool.id, None).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].input_fingerprint, fingerprint_params(&params));
    assert_eq!(log[0].caller_tier, CallerTier::Council);
    let serialized = serde_json::to_string(&log[0]).unwrap();
    assert!(!serialized.contains("s3cr3t"));
}

#[tokio::test]
async fn test_capability_selection() {
    let svc = service();
    let proposal = search_proposal(ToolTier::PreApproved).with_capabilities(["search", "fetch"]);
    let tool = approved(&svc, proposal).await;
    let caller = Caller::new("a", CallerTier::Lead);

    let fetch = ExecutionRequest::new(tool.id, caller.clone(), json!({})).with_capability("fetch");
    assert_eq!(svc.authorize_and_execute(fetch).await.unwrap().capability, "fetch");

    let bogus = ExecutionRequest::new(tool.id, caller, json!({})).with_capability("delete");
    assert!(matches!(
        svc.authorize_and_execute(bogus).await,
        Err(WardenError::Validation(_))
    ));
    assert_eq!(svc.get_tool(tool.id).await.unwrap().usage_count, 1);
}

#[tokio::test]
async fn test_adapter_failures_are_returned_not_raised() {
    let connector = SimulatedConnector::new();
    let svc = service_with(connector.clone());
    let tool = approved(&svc, search_proposal(ToolTier::PreApproved)).await;
    let caller = Caller::new("a", CallerTier::Lead);

    connector.script(Fault::Refuse("server restarting".into()));
    let refused = svc
        .authorize_and_execute(ExecutionRequest::new(tool.id, caller.clone(), json!({})))
        .await
        .unwrap();
    assert!(!refused.success);
    assert!(refused.error.unwrap().contains("server restarting"));

    connector.script(Fault::ToolError("quota exceeded".into()));
    let reported = svc
        .authorize_and_execute(ExecutionRequest::new(tool.id, caller, json!({})))
        .await
        .unwrap();
    assert_eq!(reported.error.as_deref(), Some("quota exceeded"));

    let tool = svc.get_tool(tool.id).await.unwrap();
    assert_eq!(tool.failure_count, 2);
    assert_eq!(tool.usage_count, 2);
    assert_eq!(tool.health, HealthState::Degraded);
    assert!(tool.audit_log.iter().all(|e| !e.outcome.is_success()));
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_is_recorded() {
    let connector = SimulatedConnector::new();
    let svc = service_with(connector.clone());
    let tool = approved(&svc, search_proposal(ToolTier::PreApproved)).await;

    connector.script(Fault::Stall(Duration::from_secs(30)));
    let outcome = svc
        .authorize_and_execute(ExecutionRequest::new(
            tool.id,
            Caller::new("a", CallerTier::Task),
            json!({}),
        ))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(svc.audit_log(tool.id, None).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_health_threshold_and_recovery() {
    let connector = SimulatedConnector::new().with_server(SEARCH_ADDR, ["search", "fetch"]);
    let svc = service_with(connector.clone());
    let tool = approved(&svc, search_proposal(ToolTier::PreApproved)).await;

    let mut last = None;
    for _ in 0..3 {
        connector.script(Fault::Stall(Duration::from_secs(10)));
        let report = svc.check_health(tool.id).await.unwrap();
        assert!(!report.healthy);
        assert!(report.error.is_some());
        last = Some(report);
    }
    let last = last.unwrap();
    assert_eq!(last.health, HealthState::Down);
    assert_eq!(last.consecutive_failures, 3);

    let report = svc.check_health(tool.id).await.unwrap();
    assert!(report.healthy);
    assert_eq!(report.health, HealthState::Healthy);
    assert_eq!(report.capability_count, 2);
    assert_eq!(report.consecutive_failures, 0);
    assert_eq!(report.failure_count, 3);

    // health never changes lifecycle status
    let stored = svc.get_tool(tool.id).await.unwrap();
    assert_eq!(stored.status, ToolStatus::Approved);
    assert_eq!(stored.discovered_capability_count, Some(2));
    assert_eq!(stored.last_health_latency_ms, Some(report.latency_ms));
}

#[tokio::test]
async fn test_audit_limit_and_order() {
    let svc = service();
    let tool = approved(&svc, search_proposal(ToolTier::PreApproved)).await;
    for i in 0..6 {
        let request = ExecutionRequest::new(
            tool.id,
            Caller::new(format!("agent-{}", i), CallerTier::Lead),
            json!({"n": i}),
        );
        svc.authorize_and_execute(request).await.unwrap();
    }

    let view = svc.audit(tool.id, Some(4)).await.unwrap();
    assert_eq!(view.total, 6);
    assert_eq!(view.entries.len(), 4);
    assert_eq!(view.entries[0].caller_id, "agent-5");
    assert!(view
        .entries
        .windows(2)
        .all(|w| w[0].timestamp >= w[1].timestamp));

    assert!(svc.audit_log(tool.id, Some(0)).await.unwrap().is_empty());
    assert_eq!(svc.audit_log(tool.id, Some(100_000)).await.unwrap().len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_keep_audit_time_ordered() {
    let svc = Arc::new(service());
    let id = approved(&svc, search_proposal(ToolTier::PreApproved)).await.id;

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                for i in 0..25 {
                    let caller = Caller::new(format!("agent-{}-{}", worker, i), CallerTier::Task);
                    svc.authorize_and_execute(ExecutionRequest::new(id, caller, json!({"i": i})))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for joined in futures::future::join_all(handles).await {
        joined.unwrap();
    }

    let view = svc.audit(id, Some(1000)).await.unwrap();
    assert_eq!(view.total, 200);
    assert!(view
        .entries
        .windows(2)
        .all(|w| w[0].timestamp >= w[1].timestamp));
    let tool = svc.get_tool(id).await.unwrap();
    assert_eq!(tool.usage_count, 200);
    assert_eq!(tool.last_used_at, Some(view.entries[0].timestamp));
}

#[tokio::test]
async fn test_role_based_listing() {
    let svc = service();
    let a = approved(&svc, search_proposal(ToolTier::PreApproved)).await;
    svc.propose_tool(
        ToolProposal::new("pending", "Waiting for a council vote", "npx pending", ToolTier::Restricted),
        &member(),
    )
    .await
    .unwrap();

    let all = svc.list_tools(ToolFilter::any(), ActorRole::Admin).await.unwrap();
    assert_eq!(all.len(), 2);

    let proposed = svc
        .list_tools(ToolFilter::any().with_status(ToolStatus::Proposed), ActorRole::Member)
        .await
        .unwrap();
    assert_eq!(proposed.len(), 1);
    assert_eq!(proposed[0].id, a.id);

    let restricted = svc
        .list_tools(ToolFilter::any().with_tier(ToolTier::Restricted), ActorRole::Member)
        .await
        .unwrap();
    assert!(restricted.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approve_and_revoke() {
    for _ in 0..25 {
        let svc = Arc::new(service());
        let tool = svc
            .propose_tool(search_proposal(ToolTier::PreApproved), &member())
            .await
            .unwrap();
        let id = tool.id;

        let approve = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.approve_tool(id, &admin(), None).await })
        };
        let revoke = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.revoke_tool(id, &admin(), "race").await })
        };
        let approve = approve.await.unwrap();
        let revoke = revoke.await.unwrap();

        let status = svc.get_tool(tool.id).await.unwrap().status;
        match (approve.is_ok(), revoke.is_ok()) {
            // revoke ran first and failed, or ran second and succeeded
            (true, false) => {
                assert!(matches!(revoke, Err(WardenError::InvalidTransition(_))));
                assert_eq!(status, ToolStatus::Approved);
            }
            (true, true) => assert_eq!(status, ToolStatus::Revoked),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_double_approve() {
    let svc = Arc::new(service());
    let tool = svc
        .propose_tool(search_proposal(ToolTier::PreApproved), &member())
        .await
        .unwrap();
    let id = tool.id;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let svc = Arc::clone(&svc);
            let actor = Actor::new(format!("admin-{}", i), ActorRole::Admin);
            tokio::spawn(async move { svc.approve_tool(id, &actor, None).await })
        })
        .collect();

    let wins = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();
    assert_eq!(wins, 1);
}

#[derive(Debug, Clone)]
enum Op {
    Approve,
    Reject,
    Revoke,
    Disable,
    Enable,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Approve),
        Just(Op::Reject),
        Just(Op::Revoke),
        Just(Op::Disable),
        Just(Op::Enable),
    ]
}

fn tier_strategy() -> impl Strategy<Value = ToolTier> {
    prop_oneof![
        Just(ToolTier::PreApproved),
        Just(ToolTier::Restricted),
        Just(ToolTier::Forbidden),
    ]
}

proptest! {
    #[test]
    fn prop_lifecycle_invariants(tier in tier_strategy(), ops in prop::collection::vec(op_strategy(), 0..24)) {
        tokio_test::block_on(async {
            let svc = service();
            let proposal = ToolProposal::new("prop_tool", "Property-tested tool", "npx prop", tier);
            let tool = svc.propose_tool(proposal, &member()).await.unwrap();
            let mut was_revoked = false;

            for op in ops {
                let result = match op {
                    Op::Approve => svc.approve_tool(tool.id, &admin(), None).await,
                    Op::Reject => svc.reject_tool(tool.id, &admin(), "no").await,
                    Op::Revoke => svc.revoke_tool(tool.id, &admin(), "gone").await,
                    Op::Disable => svc.disable_tool(tool.id, &admin(), "pause").await,
                    Op::Enable => svc.enable_tool(tool.id, &admin()).await,
                };

                let current = svc.get_tool(tool.id).await.unwrap();
                if tier == ToolTier::Forbidden {
                    prop_assert_ne!(current.status, ToolStatus::Approved);
                }
                if was_revoked {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(current.status, ToolStatus::Revoked);
                }
                prop_assert_eq!(current.approval.is_some(), current.status == ToolStatus::Approved);
                prop_assert_eq!(
                    current.revocation.is_some(),
                    matches!(current.status, ToolStatus::Revoked | ToolStatus::Disabled)
                );
                was_revoked = current.status == ToolStatus::Revoked;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
