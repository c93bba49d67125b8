//! Execute Handler (C10): the single entry point dispatching across the
//! five execution modes and wiring the cross-component invariants together
//! (dedup on create, online SHGAT training, Thompson updates, DR-DSP
//! edge insertion).

use crate::capability::{
    Capability, CapabilityRecord, CapabilityRegistry, CapabilityStore, CreateArgs, Scope,
};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::executor::{
    Command, ControlledExecutor, ExecutionResult, SerializedState, ToolInvoker, WorkflowStatus,
};
use crate::hypergraph::{
    capability_edge_weight, find_shortest_hyperpath, Hyperedge, HypergraphStore, HypergraphUpdate,
    HyperpathResult, NodeKind as HyperNodeKind,
};
use crate::ids::CapabilityId;
use crate::plan::{build_physical_dag, PhysicalDag, PlanOptions};
use crate::ranker::{CapabilityNode, SHGATRanker, TrainExample};
use crate::static_structure::{self, StaticStructure};
use crate::threshold::ThresholdManager;
use crate::tool::{ToolId, ToolRegistry};
use crate::trace::{Trace, TraceStore};
use crate::vector::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// `ExecuteArgs` on the wire (spec.md §6). Exactly one of `code`,
/// `accept_suggestion`, `continue_workflow`, `capability` may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteArgs {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    #[serde(default)]
    pub accept_suggestion: Option<AcceptSuggestion>,
    #[serde(default)]
    pub continue_workflow: Option<ContinueWorkflow>,
    #[serde(default)]
    pub options: Option<ExecuteOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptSuggestion {
    pub call_name: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueWorkflow {
    pub workflow_id: String,
    pub approved: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteOptions {
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Forces human-in-the-loop approval on every layer, not just on
    /// elevated/unknown-tool tasks (spec.md §4.6).
    #[serde(default)]
    pub per_layer_validation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagSummary {
    pub layer_count: u32,
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionCandidate {
    pub capability_id: String,
    pub fqdn: String,
    pub score: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestions {
    pub candidates: Vec<SuggestionCandidate>,
    pub suggested_dag: Option<HyperpathResult>,
}

/// `ExecuteResponse` on the wire, discriminated by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteResponse {
    Success {
        result: serde_json::Value,
        capability_id: String,
        capability_fqdn: String,
        execution_time_ms: u64,
        dag: DagSummary,
    },
    ApprovalRequired {
        workflow_id: String,
        checkpoint_id: String,
        pending_layer: u32,
        layer_results: SerializedState,
    },
    Suggestions {
        suggestions: Suggestions,
        confidence: f64,
    },
}

/// Context retained across an approval gate so the post-execution pipeline
/// (capability dedup, SHGAT training, Thompson update, DR-DSP edge) still
/// runs once the paused workflow is approved and resumed.
struct PendingDirect {
    intent: String,
    code: String,
    structure: StaticStructure,
    dag: PhysicalDag,
}

/// Bundles every component the execute handler dispatches across.
pub struct Gateway {
    config: GatewayConfig,
    tools: Arc<ToolRegistry>,
    capabilities: CapabilityRegistry,
    capability_store: CapabilityStore,
    hypergraph: HypergraphStore,
    ranker: Arc<SHGATRanker>,
    thresholds: ThresholdManager,
    executor: ControlledExecutor,
    embedder: Arc<dyn EmbeddingProvider>,
    traces: TraceStore,
    pending: Mutex<HashMap<String, PendingDirect>>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        tools: Arc<ToolRegistry>,
        capabilities: CapabilityRegistry,
        capability_store: CapabilityStore,
        hypergraph: HypergraphStore,
        ranker: Arc<SHGATRanker>,
        thresholds: ThresholdManager,
        invoker: Arc<dyn ToolInvoker>,
        store: crate::executor::WorkflowStore,
        embedder: Arc<dyn EmbeddingProvider>,
        traces: TraceStore,
    ) -> Self {
        let executor = ControlledExecutor::new(tools.clone(), invoker, store)
            .with_max_concurrency(config.max_concurrency)
            .with_task_timeout(std::time::Duration::from_millis(config.task_timeout_ms));
        Self {
            config,
            tools,
            capabilities,
            capability_store,
            hypergraph,
            ranker,
            thresholds,
            executor,
            embedder,
            traces,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn execute(&self, args: ExecuteArgs) -> Result<ExecuteResponse> {
        let modes = [
            args.code.is_some(),
            args.accept_suggestion.is_some(),
            args.capability.is_some(),
            args.continue_workflow.is_some(),
        ];
        if modes.iter().filter(|m| **m).count() > 1 {
            return Err(Error::invalid_argument(
                "at most one of `code`, `accept_suggestion`, `capability`, `continue_workflow` may be supplied",
            ));
        }

        if let Some(continue_workflow) = &args.continue_workflow {
            return self.execute_continue_workflow(continue_workflow).await;
        }
        if let Some(code) = &args.code {
            let intent = args
                .intent
                .clone()
                .ok_or_else(|| Error::invalid_argument("`intent` is required alongside `code`"))?;
            return self
                .execute_direct(&intent, code, args.args.clone().unwrap_or(serde_json::json!({})), &args.options)
                .await;
        }
        if let Some(accept) = &args.accept_suggestion {
            return self.execute_accept_suggestion(accept, &args.options).await;
        }
        if let Some(name) = &args.capability {
            return self
                .execute_call_by_name(name, args.args.clone().unwrap_or(serde_json::json!({})), &args.options)
                .await;
        }
        let intent = args
            .intent
            .ok_or_else(|| Error::invalid_argument("one of `intent`, `code`, `accept_suggestion`, `capability`, `continue_workflow` is required"))?;
        self.execute_suggestion(&intent).await
    }

    async fn execute_direct(
        &self,
        intent: &str,
        code: &str,
        call_args: serde_json::Value,
        options: &Option<ExecuteOptions>,
    ) -> Result<ExecuteResponse> {
        if code.len() > self.config.max_code_bytes {
            return Err(Error::code_too_large(code.len(), self.config.max_code_bytes));
        }
        let structure = static_structure::build(code)?;
        let tools = self.tools.clone();
        static_structure::validate(&structure, Some(&|id: &ToolId| tools.contains(id)))?;

        let plan_options = PlanOptions {
            approval_mode_hil: options.as_ref().map_or(false, |o| o.per_layer_validation),
            known_capability_ids: Vec::new(),
        };
        let dag = build_physical_dag(&structure, &self.tools, &plan_options)?;

        let workflow_id = crate::ids::WorkflowId::new().to_string();
        self.pending.lock().expect("pending-direct lock poisoned").insert(
            workflow_id.clone(),
            PendingDirect {
                intent: intent.to_string(),
                code: code.to_string(),
                structure,
                dag: dag.clone(),
            },
        );

        let result = self.executor.execute(&workflow_id, &dag, &call_args).await?;
        self.conclude(&workflow_id, result).await
    }

    async fn execute_suggestion(&self, intent: &str) -> Result<ExecuteResponse> {
        let embedding = self.embedder.encode(intent).await?;
        let scored = self.ranker.score_all_capabilities(&embedding)?;
        let threshold = self.thresholds.suggestion_threshold();

        let mut candidates = Vec::new();
        let mut top_dag = None;
        let mut confidence = 0.0;

        if let Some(top) = scored.first() {
            confidence = top.score;
            if let Some(record) = self.capabilities.get_by_id(top.capability_id)? {
                if top.score >= threshold && record.success_rate() >= 0.8 {
                    if let Some(capability) = self.capability_store.get(top.capability_id)? {
                        if let Some(tool) = capability.tools_used.first() {
                            top_dag = Some(find_shortest_hyperpath(
                                &self.hypergraph,
                                &tool.to_string(),
                                &top.capability_id.to_string(),
                            )?);
                        }
                    }
                }
                candidates.push(SuggestionCandidate {
                    capability_id: record.id.to_string(),
                    fqdn: record.fqdn.clone(),
                    score: top.score,
                    success_rate: record.success_rate(),
                });
            }
        }

        Ok(ExecuteResponse::Suggestions {
            suggestions: Suggestions { candidates, suggested_dag: top_dag },
            confidence,
        })
    }

    async fn execute_accept_suggestion(
        &self,
        accept: &AcceptSuggestion,
        options: &Option<ExecuteOptions>,
    ) -> Result<ExecuteResponse> {
        let scope = self.config.default_scope.clone();
        let record = self
            .capabilities
            .resolve_by_name(&accept.call_name, &scope)?
            .ok_or_else(|| Error::not_found(format!("capability `{}` not found", accept.call_name)))?;
        self.execute_resolved_capability(&record, accept.args.clone(), options).await
    }

    async fn execute_call_by_name(
        &self,
        name: &str,
        call_args: serde_json::Value,
        options: &Option<ExecuteOptions>,
    ) -> Result<ExecuteResponse> {
        let scope = self.config.default_scope.clone();
        let record = self
            .capabilities
            .resolve_by_name(name, &scope)?
            .ok_or_else(|| Error::not_found(format!("capability `{name}` not found")))?;
        self.execute_resolved_capability(&record, Some(call_args), options).await
    }

    async fn execute_resolved_capability(
        &self,
        record: &CapabilityRecord,
        call_args: Option<serde_json::Value>,
        options: &Option<ExecuteOptions>,
    ) -> Result<ExecuteResponse> {
        let capability = self
            .capability_store
            .get(record.workflow_pattern_id)?
            .ok_or_else(|| Error::not_found(format!("workflow pattern for `{}` vanished", record.fqdn)))?;
        let merged = merge_with_defaults(call_args, capability.parameters_schema.as_ref());
        self.execute_direct(&capability.intent, &capability.code_snippet, merged, options).await
    }

    async fn execute_continue_workflow(&self, continue_workflow: &ContinueWorkflow) -> Result<ExecuteResponse> {
        let workflow_id = &continue_workflow.workflow_id;
        self.executor
            .enqueue_command(
                workflow_id,
                Command::ApprovalResponse {
                    checkpoint_id: workflow_id.clone(),
                    approved: continue_workflow.approved,
                    feedback: None,
                },
            )
            .await?;

        if !continue_workflow.approved {
            self.pending.lock().expect("pending-direct lock poisoned").remove(workflow_id);
            return Err(Error::approval_rejected(workflow_id.clone()));
        }

        let mut rx = self.executor.resume_from_checkpoint(workflow_id).await?;
        while rx.recv().await.is_some() {}

        let workflow = self
            .executor
            .workflow_store()
            .get_active_workflow(workflow_id)?
            .ok_or_else(|| Error::executor_crash("workflow vanished after resume"))?;

        match workflow.status {
            WorkflowStatus::AwaitingApproval => Ok(ExecuteResponse::ApprovalRequired {
                workflow_id: workflow_id.clone(),
                checkpoint_id: format!("{workflow_id}:{}", workflow.current_layer),
                pending_layer: workflow.current_layer,
                layer_results: workflow.layer_results,
            }),
            WorkflowStatus::Completed => {
                let result = ExecutionResult {
                    results: workflow.layer_results.task_results,
                    successful_tasks: workflow.layer_results.successful_tasks,
                    failed_tasks: workflow.layer_results.failed_tasks,
                    parallelization_layers: workflow.total_layers,
                    errors: Vec::new(),
                    execution_time_ms: 0,
                    status: WorkflowStatus::Completed,
                    pending_checkpoint_id: None,
                };
                self.conclude(workflow_id, result).await
            }
            other => Err(Error::state_violation(other.as_str(), "resume")),
        }
    }

    /// Shared tail of the direct-execution pipeline: on completion, dedup
    /// the capability, train SHGAT online, update Thompson posteriors, and
    /// insert a DR-DSP hyperedge; on an approval gate, surface it instead.
    async fn conclude(&self, workflow_id: &str, result: ExecutionResult) -> Result<ExecuteResponse> {
        if result.status == WorkflowStatus::AwaitingApproval {
            let checkpoint_id = result
                .pending_checkpoint_id
                .clone()
                .unwrap_or_else(|| workflow_id.to_string());
            let pending_layer = self
                .executor
                .workflow_store()
                .get_active_workflow(workflow_id)?
                .map_or(0, |w| w.current_layer);
            return Ok(ExecuteResponse::ApprovalRequired {
                workflow_id: workflow_id.to_string(),
                checkpoint_id,
                pending_layer,
                layer_results: SerializedState {
                    task_results: result.results,
                    successful_tasks: result.successful_tasks,
                    failed_tasks: result.failed_tasks,
                },
            });
        }

        let pending = self
            .pending
            .lock()
            .expect("pending-direct lock poisoned")
            .remove(workflow_id)
            .ok_or_else(|| Error::executor_crash("no pending direct-execution context for workflow"))?;

        self.finish_direct(&pending.intent, &pending.code, &pending.structure, &pending.dag, result)
            .await
    }

    async fn finish_direct(
        &self,
        intent: &str,
        code: &str,
        structure: &StaticStructure,
        dag: &PhysicalDag,
        result: ExecutionResult,
    ) -> Result<ExecuteResponse> {
        let scope = self.config.default_scope.clone();
        let code_hash = hash_code(code);
        let mut tools_used: Vec<ToolId> = dag.logical_tasks.values().map(|t| t.tool.clone()).collect();
        tools_used.sort();
        tools_used.dedup();
        let success = result.status == WorkflowStatus::Completed && result.failed_tasks.is_empty();
        let embedding = self.embedder.encode(intent).await?;

        let executed_path: Vec<ToolId> = result
            .successful_tasks
            .iter()
            .filter_map(|id| dag.logical_tasks.get(id))
            .map(|t| t.tool.clone())
            .collect();
        let decisions = static_structure::infer_decisions(structure, &executed_path);

        let capability = match self.capability_store.get_by_code_hash(&code_hash)? {
            Some(existing) => existing,
            None => {
                let capability = Capability {
                    id: CapabilityId::new(),
                    code_hash: code_hash.clone(),
                    code_snippet: code.to_string(),
                    intent: intent.to_string(),
                    tools_used: tools_used.clone(),
                    success_count: 0,
                    usage_count: 0,
                    total_latency_ms: 0,
                    parameters_schema: None,
                    children: Vec::new(),
                    hierarchy_level: 0,
                    embedding: embedding.clone(),
                };
                self.capability_store.create(&capability)?;
                capability
            }
        };

        let record = match self.capabilities.get_by_code_hash(&code_hash, &scope)? {
            Some(existing) => existing,
            None => {
                let routing = self.tools.routing_for(&tools_used);
                let namespace = tools_used
                    .first()
                    .map(|t| t.namespace().to_string())
                    .unwrap_or_else(|| "wf".to_string());
                self.capabilities.create(
                    CreateArgs {
                        scope: scope.clone(),
                        namespace,
                        action: format!("exec_{}", &code_hash[..8.min(code_hash.len())]),
                        workflow_pattern_id: capability.id,
                        code_hash: code_hash.clone(),
                        short_hash: code_hash[..4.min(code_hash.len())].to_string(),
                        tools_used: tools_used.clone(),
                        created_by: "gateway".to_string(),
                    },
                    routing,
                )?
            }
        };

        self.capability_store.record_usage(capability.id, success, result.execution_time_ms)?;
        self.capabilities.record_usage(record.id, success, result.execution_time_ms)?;
        let capability = self
            .capability_store
            .get(capability.id)?
            .ok_or_else(|| Error::executor_crash("capability vanished immediately after recording usage"))?;

        for tool in &tools_used {
            if let Some(handle) = self.tools.get(tool) {
                self.ranker.register_tool(tool.clone(), handle.embedding.clone());
                self.hypergraph
                    .apply_update(&HypergraphUpdate::NodeAdd { id: tool.to_string(), kind: HyperNodeKind::Tool })?;
            }
            if let Err(err) = self.thresholds.record_outcome(tool, success) {
                tracing::warn!(tool = %tool, error = %err, "failed to record Thompson outcome");
            }
        }

        self.hypergraph.apply_update(&HypergraphUpdate::NodeAdd {
            id: record.id.to_string(),
            kind: HyperNodeKind::Capability,
        })?;

        self.ranker.register_capability(CapabilityNode {
            id: record.id,
            fqdn: record.fqdn.clone(),
            embedding: capability.embedding.clone(),
            members: tools_used.clone(),
            hierarchy_level: capability.hierarchy_level,
            success_rate: capability.success_rate(),
            children: capability.children.clone(),
            parents: Vec::new(),
            last_used_at: chrono::Utc::now(),
        });

        match self.ranker.train_on_example(&TrainExample {
            intent_embedding: embedding.clone(),
            context_tools: tools_used.clone(),
            candidate_id: record.id,
            outcome: success,
        }) {
            Ok(_) | Err(Error::TrainingBusy) => {}
            Err(err) => tracing::warn!(error = %err, "SHGAT online training failed"),
        }

        let edge = Hyperedge {
            id: format!("cap:{}", record.id),
            sources: tools_used.iter().map(ToolId::to_string).collect(),
            targets: vec![record.id.to_string()],
            weight: capability_edge_weight(capability.success_rate()),
            metadata: serde_json::json!({}),
        };
        self.hypergraph.apply_update(&HypergraphUpdate::EdgeAdd { edge })?;

        let trace = Trace::new(
            Some(record.id),
            intent.to_string(),
            executed_path,
            serde_json::to_value(&result.results)?,
            decisions,
            result.execution_time_ms,
            success,
            embedding,
        );
        self.traces.append(&trace)?;

        Ok(ExecuteResponse::Success {
            result: serde_json::to_value(&result.results)?,
            capability_id: record.id.to_string(),
            capability_fqdn: record.fqdn.clone(),
            execution_time_ms: result.execution_time_ms,
            dag: DagSummary {
                layer_count: dag.layer_count,
                task_count: dag.logical_tasks.len(),
            },
        })
    }
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fill any parameter missing from `args` with its schema-declared default,
/// where `schema` is a JSON Schema object with `properties.<name>.default`.
fn merge_with_defaults(args: Option<serde_json::Value>, schema: Option<&serde_json::Value>) -> serde_json::Value {
    let mut merged = args.unwrap_or_else(|| serde_json::json!({}));
    let Some(properties) = schema.and_then(|s| s.get("properties")).and_then(|p| p.as_object()) else {
        return merged;
    };
    let Some(map) = merged.as_object_mut() else {
        return merged;
    };
    for (name, field_schema) in properties {
        if !map.contains_key(name) {
            if let Some(default) = field_schema.get("default") {
                map.insert(name.clone(), default.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_with_defaults_fills_missing_fields_only() {
        let schema = serde_json::json!({
            "properties": {
                "path": {"default": "config.json"},
                "mode": {"default": "r"}
            }
        });
        let merged = merge_with_defaults(Some(serde_json::json!({"mode": "w"})), Some(&schema));
        assert_eq!(merged["path"], "config.json");
        assert_eq!(merged["mode"], "w");
    }

    #[test]
    fn merge_with_defaults_handles_no_schema() {
        let merged = merge_with_defaults(Some(serde_json::json!({"a": 1})), None);
        assert_eq!(merged["a"], 1);
    }
}
