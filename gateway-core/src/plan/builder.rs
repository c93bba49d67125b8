//! Plan Builder & Optimizer (C8): lowers a [`StaticStructure`] to a logical
//! DAG, fuses adjacent pure tasks, and assigns parallel layers.
//!
//! Grounded on the same Kahn's-algorithm style as
//! `static_structure::builder::assert_acyclic`, extended here to longest-path
//! layering (each task gets the smallest layer such that every dependency
//! sits in a strictly earlier one) instead of a plain cycle check.

use super::types::{LogicalTask, PhysicalDag, PhysicalTask, PlanOptions};
use crate::error::{Error, Result};
use crate::ids::CapabilityId;
use crate::static_structure::{ArgumentRef, EdgeKind, NodeId, NodeKind, StaticStructure};
use crate::tool::ToolRegistry;
use std::collections::{HashMap, VecDeque};

/// Lower a static structure and build its optimized, layered physical DAG.
pub fn build_physical_dag(
    structure: &StaticStructure,
    tools: &ToolRegistry,
    options: &PlanOptions,
) -> Result<PhysicalDag> {
    let logical = lower(structure);
    if logical.is_empty() {
        return Err(Error::NoDag);
    }
    let logical_by_id: HashMap<NodeId, &LogicalTask> =
        logical.iter().map(|t| (t.id.clone(), t)).collect();

    let groups = fuse(&logical, tools);
    let (depends_on, order) = physical_dependencies(&logical_by_id, &groups);
    let layer_of = layer_tasks(&order, &depends_on)?;

    let mut physical_tasks: Vec<PhysicalTask> = order
        .iter()
        .map(|group_id| {
            let members = groups[group_id].clone();
            let requires_approval = members
                .iter()
                .any(|m| task_requires_approval(logical_by_id[m], tools, options));
            PhysicalTask {
                id: group_id.clone(),
                logical_tasks: members,
                depends_on: depends_on[group_id].clone(),
                layer_index: layer_of[group_id],
                requires_approval,
            }
        })
        .collect();
    physical_tasks.sort_by(|a, b| a.layer_index.cmp(&b.layer_index).then_with(|| a.id.cmp(&b.id)));

    let layer_count = physical_tasks.iter().map(|t| t.layer_index).max().map_or(0, |m| m + 1);
    let requires_approval = physical_tasks.iter().any(|t| t.requires_approval);

    Ok(PhysicalDag {
        logical_tasks: logical.into_iter().map(|t| (t.id.clone(), t)).collect(),
        physical_tasks,
        layer_count,
        requires_approval,
    })
}

fn lower(structure: &StaticStructure) -> Vec<LogicalTask> {
    structure
        .task_nodes()
        .map(|node| {
            let NodeKind::Task {
                tool,
                static_arguments,
                binding,
            } = &node.kind
            else {
                unreachable!("task_nodes() only yields Task nodes")
            };
            let mut depends_on: Vec<NodeId> = structure
                .edges
                .iter()
                .filter(|e| e.to == node.id && e.kind == EdgeKind::DataFlow)
                .map(|e| e.from.clone())
                .collect();
            depends_on.dedup();
            let argument_sources: HashMap<String, NodeId> = structure
                .edges
                .iter()
                .filter(|e| e.to == node.id && e.kind == EdgeKind::DataFlow)
                .filter_map(|e| e.argument.clone().map(|arg| (arg, e.from.clone())))
                .collect();
            LogicalTask {
                id: node.id.clone(),
                tool: tool.clone(),
                static_arguments: static_arguments.clone(),
                argument_sources,
                binding: binding.clone(),
                depends_on,
                loop_id: node.metadata.loop_id.clone(),
                loop_type: node.metadata.loop_type,
            }
        })
        .collect()
}

/// Fuse chains of adjacent pure tasks under spec.md §4.6's four conditions.
/// Returns the final grouping: physical group id -> member logical task ids,
/// in execution order.
fn fuse(logical: &[LogicalTask], tools: &ToolRegistry) -> HashMap<String, Vec<NodeId>> {
    let mut owner: HashMap<NodeId, String> =
        logical.iter().map(|t| (t.id.clone(), t.id.clone())).collect();
    let mut members: HashMap<String, Vec<NodeId>> =
        logical.iter().map(|t| (t.id.clone(), vec![t.id.clone()])).collect();
    let by_id: HashMap<&NodeId, &LogicalTask> = logical.iter().map(|t| (&t.id, t)).collect();

    loop {
        let mut consumers: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for t in logical {
            for d in &t.depends_on {
                consumers.entry(d).or_default().push(&t.id);
            }
        }

        let mut fused_any = false;
        for t in logical {
            if t.depends_on.len() != 1 {
                continue;
            }
            let upstream_id = &t.depends_on[0];
            if owner[&t.id] == owner[upstream_id] {
                continue;
            }
            if consumers.get(upstream_id).map(Vec::len) != Some(1) {
                continue;
            }
            let upstream = by_id[upstream_id];
            let downstream_pure = tools.get(&t.tool).map(|h| h.pure).unwrap_or(false);
            let upstream_pure = tools.get(&upstream.tool).map(|h| h.pure).unwrap_or(false);
            if !downstream_pure || !upstream_pure {
                continue;
            }
            if upstream.loop_id != t.loop_id {
                continue;
            }

            let upstream_group = owner[upstream_id].clone();
            let downstream_group = owner[&t.id].clone();
            let absorbed = members.remove(&downstream_group).expect("group must exist");
            for id in &absorbed {
                owner.insert(id.clone(), upstream_group.clone());
            }
            members.get_mut(&upstream_group).expect("group must exist").extend(absorbed);
            fused_any = true;
        }
        if !fused_any {
            break;
        }
    }

    members
}

/// Physical dependsOn per group, plus group ids in first-member-appearance
/// order (stable output ordering for tests and wire serialization).
fn physical_dependencies(
    logical_by_id: &HashMap<NodeId, &LogicalTask>,
    groups: &HashMap<String, Vec<NodeId>>,
) -> (HashMap<String, Vec<String>>, Vec<String>) {
    let owner: HashMap<&NodeId, &String> = groups
        .iter()
        .flat_map(|(group, members)| members.iter().map(move |m| (m, group)))
        .collect();

    let mut depends_on: HashMap<String, Vec<String>> = HashMap::new();
    for (group_id, member_ids) in groups {
        let mut deps: Vec<String> = Vec::new();
        for m in member_ids {
            for d in &logical_by_id[m].depends_on {
                let dep_group = (*owner[d]).clone();
                if &dep_group != group_id && !deps.contains(&dep_group) {
                    deps.push(dep_group);
                }
            }
        }
        depends_on.insert(group_id.clone(), deps);
    }

    let mut order: Vec<String> = groups.keys().cloned().collect();
    order.sort();
    (depends_on, order)
}

fn layer_tasks(order: &[String], depends_on: &HashMap<String, Vec<String>>) -> Result<HashMap<String, u32>> {
    let mut indegree: HashMap<&str, usize> = order.iter().map(|id| (id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, deps) in depends_on {
        *indegree.get_mut(id.as_str()).unwrap() += deps.len();
        for d in deps {
            dependents.entry(d.as_str()).or_default().push(id.as_str());
        }
    }

    let mut layer: HashMap<String, u32> = HashMap::new();
    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    for id in &queue {
        layer.insert((*id).to_string(), 0);
    }

    let mut processed = 0usize;
    while let Some(id) = queue.pop_front() {
        processed += 1;
        let current = layer[id];
        if let Some(deps) = dependents.get(id) {
            for dep in deps {
                let entry = indegree.get_mut(dep).unwrap();
                *entry -= 1;
                let candidate = current + 1;
                let existing = layer.get(*dep).copied().unwrap_or(0);
                layer.insert((*dep).to_string(), existing.max(candidate));
                if *entry == 0 {
                    queue.push_back(dep);
                }
            }
        }
    }

    if processed != order.len() {
        return Err(Error::invalid_argument("physical dag's dependency graph contains a cycle"));
    }
    Ok(layer)
}

fn task_requires_approval(task: &LogicalTask, tools: &ToolRegistry, options: &PlanOptions) -> bool {
    if options.approval_mode_hil {
        return true;
    }
    match tools.get(&task.tool) {
        None => return true,
        Some(tool) if tool.elevated => return true,
        Some(_) => {}
    }
    if let Some(ArgumentRef::Literal { value }) = task.static_arguments.get("capability_id") {
        if let Some(id_str) = value.as_str() {
            if let Ok(id) = CapabilityId::parse(id_str) {
                if !options.known_capability_ids.contains(&id) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_structure;
    use crate::tool::{Routing, Tool, ToolId};
    use crate::vector::Vector;

    fn registry_with(tools: &[(&str, bool, bool)]) -> ToolRegistry {
        let registry = ToolRegistry::new();
        for (id, pure, elevated) in tools {
            registry.register(Tool {
                id: ToolId::parse(id).unwrap(),
                name: (*id).to_string(),
                description: String::new(),
                input_schema: serde_json::json!({}),
                output_schema: None,
                embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
                success_stats: Default::default(),
                pure: *pure,
                routing: Routing::Local,
                elevated: *elevated,
            });
        }
        registry
    }

    #[test]
    fn single_task_has_one_layer_zero_physical_task() {
        let structure = static_structure::build("await mcp.fs.read_file({path: 'a'});").unwrap();
        let tools = registry_with(&[("fs:read_file", true, false)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert_eq!(dag.physical_tasks.len(), 1);
        assert_eq!(dag.layer_count, 1);
        assert!(!dag.requires_approval);
    }

    #[test]
    fn fuses_chain_of_pure_single_consumer_tasks() {
        let code = "const a = await mcp.fs.read_file({path: 'x'});\n\
                    const b = await mcp.fs.parse_json({data: a});";
        let structure = static_structure::build(code).unwrap();
        let tools = registry_with(&[("fs:read_file", true, false), ("fs:parse_json", true, false)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert_eq!(dag.physical_tasks.len(), 1);
        assert_eq!(dag.physical_tasks[0].logical_tasks.len(), 2);
    }

    #[test]
    fn does_not_fuse_across_impure_tasks() {
        let code = "const a = await mcp.fs.read_file({path: 'x'});\n\
                    const b = await mcp.gh.create_issue({body: a});";
        let structure = static_structure::build(code).unwrap();
        let tools = registry_with(&[("fs:read_file", true, false), ("gh:create_issue", false, false)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert_eq!(dag.physical_tasks.len(), 2);
    }

    #[test]
    fn does_not_fuse_when_consumer_has_other_producer() {
        let code = "const a = await mcp.fs.read_file({path: 'x'});\n\
                    const b = await mcp.fs.read_file({path: 'y'});\n\
                    const c = await mcp.fs.diff({left: a, right: b});";
        let structure = static_structure::build(code).unwrap();
        let tools = registry_with(&[("fs:read_file", true, false), ("fs:diff", true, false)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        // c has two producers so it cannot fuse with either upstream task.
        assert_eq!(dag.physical_tasks.len(), 3);
    }

    #[test]
    fn unknown_tool_requires_approval() {
        let structure = static_structure::build("await mcp.fs.read_file({path: 'a'});").unwrap();
        let tools = registry_with(&[]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert!(dag.requires_approval);
        assert!(dag.physical_tasks[0].requires_approval);
    }

    #[test]
    fn elevated_tool_requires_approval() {
        let structure = static_structure::build("await mcp.fs.write_file({path: 'a'});").unwrap();
        let tools = registry_with(&[("fs:write_file", false, true)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert!(dag.requires_approval);
    }

    #[test]
    fn independent_tasks_share_a_layer() {
        let code = "const a = await mcp.fs.read_file({path: 'x'});\n\
                    const b = await mcp.fs.read_file({path: 'y'});";
        let structure = static_structure::build(code).unwrap();
        let tools = registry_with(&[("fs:read_file", false, false)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert_eq!(dag.layer_count, 1);
        assert_eq!(dag.physical_tasks.len(), 2);
    }

    #[test]
    fn dependent_tasks_span_two_layers() {
        let code = "const a = await mcp.fs.read_file({path: 'x'});\n\
                    const b = await mcp.gh.create_issue({body: a});";
        let structure = static_structure::build(code).unwrap();
        let tools = registry_with(&[("fs:read_file", true, false), ("gh:create_issue", false, false)]);
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        assert_eq!(dag.layer_count, 2);
    }
}
