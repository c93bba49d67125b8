//! End-to-end scenarios for the execute handler (spec.md §8's six
//! "concrete end-to-end scenarios"): direct-creates-capability, dedup,
//! suggestion, accept-suggestion-by-name, and the HIL pause/continue/reject
//! cycle. Each builds a full in-memory [`Gateway`] the way `gateway-cli`
//! does, with a [`FakeInvoker`] standing in for the real tool provider.

use gateway_core::capability::{CapabilityRegistry, CapabilityStore};
use gateway_core::executor::{FakeInvoker, ToolInvoker, WorkflowStore};
use gateway_core::handler::{AcceptSuggestion, ContinueWorkflow, ExecuteArgs};
use gateway_core::hypergraph::HypergraphStore;
use gateway_core::ranker::SHGATRanker;
use gateway_core::store::SqlitePool;
use gateway_core::threshold::ThresholdManager;
use gateway_core::tool::{Routing, Tool, ToolId, ToolRegistry};
use gateway_core::trace::TraceStore;
use gateway_core::vector::{DeterministicHashEmbedder, Vector};
use gateway_core::{ExecuteResponse, Gateway, GatewayConfig};
use std::sync::Arc;

fn register(registry: &ToolRegistry, id: &str, pure: bool, elevated: bool) {
    registry.register(Tool {
        id: ToolId::parse(id).unwrap(),
        name: id.to_string(),
        description: String::new(),
        input_schema: serde_json::json!({}),
        output_schema: None,
        embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
        success_stats: Default::default(),
        pure,
        routing: Routing::Local,
        elevated,
    });
}

fn gateway(tools: Arc<ToolRegistry>, invoker: Arc<dyn ToolInvoker>) -> Gateway {
    let pool = SqlitePool::open_in_memory().unwrap();
    let hypergraph = HypergraphStore::new(pool.clone());
    Gateway::new(
        GatewayConfig::default(),
        tools,
        CapabilityRegistry::new(pool.clone()),
        CapabilityStore::new(pool.clone()),
        hypergraph.clone(),
        Arc::new(SHGATRanker::new(hypergraph, true)),
        ThresholdManager::new(pool.clone()),
        invoker,
        WorkflowStore::new(pool.clone()),
        Arc::new(DeterministicHashEmbedder::default()),
        TraceStore::new(pool),
    )
}

#[tokio::test]
async fn direct_creates_capability_and_dedups_on_resubmit() {
    let tools = ToolRegistry::new();
    register(&tools, "fs:read_file", true, false);
    let tools = Arc::new(tools);
    let invoker = Arc::new(
        FakeInvoker::new()
            .with_result(ToolId::parse("fs:read_file").unwrap(), serde_json::json!({"contents": "hi"})),
    );
    let gw = gateway(tools, invoker);

    let code = "const c = await mcp.fs.read_file({path:'config.json'});".to_string();
    let args = ExecuteArgs {
        intent: Some("read JSON config".to_string()),
        code: Some(code.clone()),
        ..Default::default()
    };

    let first = gw.execute(args.clone()).await.unwrap();
    let (fqdn1, id1) = match first {
        ExecuteResponse::Success { capability_fqdn, capability_id, result, .. } => {
            assert_eq!(result, serde_json::json!({"contents": "hi"}));
            assert!(fqdn_matches(&capability_fqdn));
            (capability_fqdn, capability_id)
        }
        other => panic!("expected success, got {other:?}"),
    };

    // Scenario 2: resubmitting the exact same code dedups onto the same record.
    let second = gw.execute(args).await.unwrap();
    match second {
        ExecuteResponse::Success { capability_fqdn, capability_id, .. } => {
            assert_eq!(capability_fqdn, fqdn1);
            assert_eq!(capability_id, id1);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

fn fqdn_matches(fqdn: &str) -> bool {
    // local.default.fs.exec_<8hex>.<4hex> -- namespace is the primary tool's,
    // not a constant (spec.md §8 scenario 1).
    let parts: Vec<&str> = fqdn.split('.').collect();
    parts.len() == 5 && parts[0] == "local" && parts[1] == "default" && parts[2] == "fs" && parts[3].starts_with("exec_")
}

#[tokio::test]
async fn suggestion_mode_surfaces_a_previously_created_capability() {
    let tools = ToolRegistry::new();
    register(&tools, "fs:read_file", true, false);
    let tools = Arc::new(tools);
    let invoker = Arc::new(
        FakeInvoker::new()
            .with_result(ToolId::parse("fs:read_file").unwrap(), serde_json::json!({"contents": "hi"})),
    );
    let gw = gateway(tools, invoker);

    let code = "const c = await mcp.fs.read_file({path:'config.json'});".to_string();
    gw.execute(ExecuteArgs {
        intent: Some("read JSON config".to_string()),
        code: Some(code),
        ..Default::default()
    })
    .await
    .unwrap();

    let suggestion = gw
        .execute(ExecuteArgs { intent: Some("read JSON config".to_string()), ..Default::default() })
        .await
        .unwrap();

    match suggestion {
        ExecuteResponse::Suggestions { suggestions, confidence } => {
            assert!(!suggestions.candidates.is_empty());
            // spec.md §8 scenario 3: confidence >= 0.7 once the capability's
            // post-usage success rate (not its pre-usage snapshot) feeds scoring.
            assert!(confidence >= 0.7, "confidence was {confidence}");
            assert!(suggestions.suggested_dag.is_some());
        }
        other => panic!("expected suggestions, got {other:?}"),
    }
}

#[tokio::test]
async fn accept_suggestion_executes_by_name_with_merged_defaults() {
    let tools = ToolRegistry::new();
    register(&tools, "fs:read_file", true, false);
    let tools = Arc::new(tools);
    let invoker = Arc::new(
        FakeInvoker::new()
            .with_result(ToolId::parse("fs:read_file").unwrap(), serde_json::json!({"contents": "hi"})),
    );
    let gw = gateway(tools, invoker);

    let code = "const c = await mcp.fs.read_file({path:'config.json'});".to_string();
    let created = gw
        .execute(ExecuteArgs {
            intent: Some("read JSON config".to_string()),
            code: Some(code),
            ..Default::default()
        })
        .await
        .unwrap();
    let call_name = match created {
        ExecuteResponse::Success { capability_fqdn, .. } => {
            // `namespace:action`, resolvable without the full fqdn/scope prefix.
            let parts: Vec<&str> = capability_fqdn.split('.').collect();
            format!("{}:{}", parts[2], parts[3])
        }
        other => panic!("expected success, got {other:?}"),
    };

    let accepted = gw
        .execute(ExecuteArgs {
            accept_suggestion: Some(AcceptSuggestion {
                call_name,
                args: Some(serde_json::json!({"path": "other.json"})),
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    match accepted {
        ExecuteResponse::Success { result, .. } => {
            assert_eq!(result, serde_json::json!({"contents": "hi"}));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn hil_pause_then_approve_completes_execution() {
    let tools = ToolRegistry::new();
    register(&tools, "fs:write_file", false, true);
    let tools = Arc::new(tools);
    let invoker = Arc::new(
        FakeInvoker::new().with_result(ToolId::parse("fs:write_file").unwrap(), serde_json::json!({"ok": true})),
    );
    let gw = gateway(tools, invoker);

    let code = "await mcp.fs.write_file({path:'a', data:'x'});".to_string();
    let paused = gw
        .execute(ExecuteArgs {
            intent: Some("write a file".to_string()),
            code: Some(code),
            ..Default::default()
        })
        .await
        .unwrap();

    let workflow_id = match paused {
        ExecuteResponse::ApprovalRequired { workflow_id, pending_layer, .. } => {
            assert_eq!(pending_layer, 0);
            workflow_id
        }
        other => panic!("expected approval_required, got {other:?}"),
    };

    let completed = gw
        .execute(ExecuteArgs {
            continue_workflow: Some(ContinueWorkflow { workflow_id, approved: true }),
            ..Default::default()
        })
        .await
        .unwrap();

    match completed {
        ExecuteResponse::Success { result, .. } => {
            assert_eq!(result, serde_json::json!({"ok": true}));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn hil_pause_then_reject_is_an_approval_rejected_error() {
    let tools = ToolRegistry::new();
    register(&tools, "fs:write_file", false, true);
    let tools = Arc::new(tools);
    let invoker = Arc::new(
        FakeInvoker::new().with_result(ToolId::parse("fs:write_file").unwrap(), serde_json::json!({"ok": true})),
    );
    let gw = gateway(tools, invoker);

    let code = "await mcp.fs.write_file({path:'a', data:'x'});".to_string();
    let paused = gw
        .execute(ExecuteArgs {
            intent: Some("write a file".to_string()),
            code: Some(code),
            ..Default::default()
        })
        .await
        .unwrap();

    let workflow_id = match paused {
        ExecuteResponse::ApprovalRequired { workflow_id, .. } => workflow_id,
        other => panic!("expected approval_required, got {other:?}"),
    };

    let err = gw
        .execute(ExecuteArgs {
            continue_workflow: Some(ContinueWorkflow { workflow_id, approved: false }),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), gateway_core::ErrorKind::ApprovalRejected);
}

#[tokio::test]
async fn mutually_exclusive_fields_are_rejected() {
    let tools = Arc::new(ToolRegistry::new());
    let invoker = Arc::new(FakeInvoker::new());
    let gw = gateway(tools, invoker);

    let err = gw
        .execute(ExecuteArgs {
            intent: Some("whatever".to_string()),
            code: Some("await mcp.fs.read_file({path:'a'});".to_string()),
            capability: Some("fs:read_file".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), gateway_core::ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn code_over_the_byte_limit_is_rejected() {
    let tools = Arc::new(ToolRegistry::new());
    let invoker = Arc::new(FakeInvoker::new());
    let mut config = GatewayConfig::default();
    config.max_code_bytes = 8;
    let pool = SqlitePool::open_in_memory().unwrap();
    let hypergraph = HypergraphStore::new(pool.clone());
    let gw = Gateway::new(
        config,
        tools,
        CapabilityRegistry::new(pool.clone()),
        CapabilityStore::new(pool.clone()),
        hypergraph.clone(),
        Arc::new(SHGATRanker::new(hypergraph, true)),
        ThresholdManager::new(pool.clone()),
        invoker,
        WorkflowStore::new(pool.clone()),
        Arc::new(DeterministicHashEmbedder::default()),
        TraceStore::new(pool),
    );

    let err = gw
        .execute(ExecuteArgs {
            intent: Some("read a file".to_string()),
            code: Some("await mcp.fs.read_file({path:'config.json'});".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), gateway_core::ErrorKind::CodeTooLarge);
}
