//! Flattens parsed [`Stmt`]s into a [`StaticStructure`] and provides the
//! post-hoc branch-decision inference (`inferDecisions`).

use super::parser::{parse_statements, Stmt};
use super::types::{
    ArgumentRef, BranchArm, Edge, EdgeKind, Node, NodeKind, NodeMetadata, StaticStructure,
};
use crate::error::{Error, Result};
use crate::tool::ToolId;
use std::collections::HashMap;

struct Builder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    bindings: HashMap<String, String>,
    counter: u32,
}

impl Builder {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            bindings: HashMap::new(),
            counter: 0,
        }
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}_{}", self.counter);
        self.counter += 1;
        id
    }

    /// Emit the statements, returning the id of the last node produced (the
    /// point later statements at this nesting level should follow).
    fn emit(&mut self, stmts: &[Stmt], mut prev: Option<String>, meta_template: &NodeMetadata) -> Option<String> {
        for stmt in stmts {
            prev = self.emit_one(stmt, prev, meta_template);
        }
        prev
    }

    fn emit_one(&mut self, stmt: &Stmt, prev: Option<String>, meta_template: &NodeMetadata) -> Option<String> {
        match stmt {
            Stmt::Task {
                binding,
                tool,
                arguments,
            } => Some(self.emit_task(binding, tool, arguments, prev, meta_template)),
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => Some(self.emit_if(condition, then_body, else_body.as_deref(), prev, meta_template)),
            Stmt::Loop {
                loop_type,
                binding: _,
                condition,
                body,
            } => Some(self.emit_loop(*loop_type, condition, body, prev, meta_template)),
        }
    }

    fn emit_task(
        &mut self,
        binding: &Option<String>,
        tool: &ToolId,
        arguments: &HashMap<String, ArgumentRef>,
        prev: Option<String>,
        meta_template: &NodeMetadata,
    ) -> String {
        let id = self.fresh_id("task");
        for (arg_name, value) in arguments {
            if let ArgumentRef::PriorResult { var, .. } = value {
                if let Some(source) = self.bindings.get(var).cloned() {
                    self.edges.push(Edge {
                        from: source,
                        to: id.clone(),
                        kind: EdgeKind::DataFlow,
                        argument: Some(arg_name.clone()),
                    });
                }
            }
        }
        if let Some(prev_id) = &prev {
            if !self.edges.iter().any(|e| &e.from == prev_id && e.to == id) {
                self.edges.push(Edge {
                    from: prev_id.clone(),
                    to: id.clone(),
                    kind: EdgeKind::Order,
                    argument: None,
                });
            }
        }
        self.nodes.push(Node {
            id: id.clone(),
            kind: NodeKind::Task {
                tool: tool.clone(),
                static_arguments: arguments.clone(),
                binding: binding.clone(),
            },
            metadata: meta_template.clone(),
        });
        if let Some(name) = binding {
            self.bindings.insert(name.clone(), id.clone());
        }
        id
    }

    fn emit_if(
        &mut self,
        condition: &str,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
        prev: Option<String>,
        meta_template: &NodeMetadata,
    ) -> String {
        let branch_id = self.fresh_id("branch");
        self.nodes.push(Node {
            id: branch_id.clone(),
            kind: NodeKind::Control {
                branch: Some(BranchArm {
                    name: "then".to_string(),
                    condition: Some(condition.to_string()),
                }),
                loop_type: None,
                condition: Some(condition.to_string()),
            },
            metadata: meta_template.clone(),
        });
        if let Some(prev_id) = prev {
            self.edges.push(Edge {
                from: prev_id,
                to: branch_id.clone(),
                kind: EdgeKind::Order,
                argument: None,
            });
        }

        let mut then_meta = meta_template.clone();
        then_meta.branch_id = Some(branch_id.clone());
        then_meta.arm = Some("then".to_string());
        self.emit(then_body, Some(branch_id.clone()), &then_meta);

        if let Some(else_stmts) = else_body {
            let mut else_meta = meta_template.clone();
            else_meta.branch_id = Some(branch_id.clone());
            else_meta.arm = Some("else".to_string());
            self.emit(else_stmts, Some(branch_id.clone()), &else_meta);
        }

        branch_id
    }

    fn emit_loop(
        &mut self,
        loop_type: super::types::LoopType,
        condition: &str,
        body: &[Stmt],
        prev: Option<String>,
        meta_template: &NodeMetadata,
    ) -> String {
        let loop_id = self.fresh_id("loop");
        self.nodes.push(Node {
            id: loop_id.clone(),
            kind: NodeKind::Control {
                branch: None,
                loop_type: Some(loop_type),
                condition: Some(condition.to_string()),
            },
            metadata: meta_template.clone(),
        });
        if let Some(prev_id) = prev {
            self.edges.push(Edge {
                from: prev_id,
                to: loop_id.clone(),
                kind: EdgeKind::Order,
                argument: None,
            });
        }

        let mut body_meta = meta_template.clone();
        body_meta.loop_id = Some(loop_id.clone());
        body_meta.loop_type = Some(loop_type);
        body_meta.loop_condition = Some(condition.to_string());
        self.emit(body, Some(loop_id.clone()), &body_meta);

        loop_id
    }
}

/// Parse `code` and flatten it into a [`StaticStructure`].
pub fn build(code: &str) -> Result<StaticStructure> {
    let stmts = parse_statements(code)?;
    let mut builder = Builder::new();
    builder.emit(&stmts, None, &NodeMetadata::default());
    Ok(StaticStructure {
        nodes: builder.nodes,
        edges: builder.edges,
        literal_bindings: HashMap::new(),
    })
}

/// A structure is DAG-convertible iff every referenced argument resolves,
/// every task's tool is known (when `tool_known` is supplied), and the
/// induced dependency graph is acyclic.
pub fn validate(structure: &StaticStructure, tool_known: Option<&dyn Fn(&ToolId) -> bool>) -> Result<()> {
    if structure.task_nodes().next().is_none() {
        return Err(Error::NoDag);
    }

    for node in &structure.nodes {
        if let NodeKind::Task {
            tool,
            static_arguments,
            ..
        } = &node.kind
        {
            if let Some(known) = tool_known {
                if !known(tool) {
                    return Err(Error::tool_unavailable(tool.to_string()));
                }
            }
            for (name, value) in static_arguments {
                if let ArgumentRef::PriorResult { var, .. } = value {
                    let resolved = structure.edges.iter().any(|e| {
                        e.to == node.id && e.kind == EdgeKind::DataFlow && e.argument.as_deref() == Some(name.as_str())
                    });
                    if !resolved {
                        return Err(Error::invalid_argument(format!(
                            "argument `{name}` on task `{}` references unresolved variable `{var}`",
                            node.id
                        )));
                    }
                }
            }
        }
    }

    assert_acyclic(structure)
}

fn assert_acyclic(structure: &StaticStructure) -> Result<()> {
    let mut indegree: HashMap<&str, usize> = structure.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &structure.edges {
        *indegree.entry(edge.to.as_str()).or_insert(0) += 1;
    }
    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop() {
        visited += 1;
        for edge in structure.edges.iter().filter(|e| e.from == id) {
            if let Some(deg) = indegree.get_mut(edge.to.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push(edge.to.as_str());
                }
            }
        }
    }
    if visited == structure.nodes.len() {
        Ok(())
    } else {
        Err(Error::invalid_argument(
            "static structure's dependency graph contains a cycle",
        ))
    }
}

/// For each branch control node, determine which arm was taken given the
/// actual executed tool sequence. Ties (neither/both arms match) resolve to
/// declaration order, i.e. `"then"`.
pub fn infer_decisions(
    structure: &StaticStructure,
    executed_path: &[ToolId],
) -> Vec<super::types::Decision> {
    let mut decisions = Vec::new();
    let mut cursor = 0usize;

    for node in &structure.nodes {
        if !matches!(node.kind, NodeKind::Control { branch: Some(_), .. }) {
            continue;
        }
        let then_tools = arm_tool_sequence(structure, &node.id, "then");
        let else_tools = arm_tool_sequence(structure, &node.id, "else");

        let then_matches = matches_from(executed_path, cursor, &then_tools);
        let else_matches = matches_from(executed_path, cursor, &else_tools);

        let (arm, tools) = if then_matches {
            ("then", then_tools)
        } else if else_matches {
            ("else", else_tools)
        } else {
            ("then", then_tools)
        };
        cursor += tools.len();

        decisions.push(super::types::Decision {
            node_id: node.id.clone(),
            arm_taken: arm.to_string(),
        });
    }
    decisions
}

fn arm_tool_sequence(structure: &StaticStructure, branch_id: &str, arm: &str) -> Vec<ToolId> {
    structure
        .nodes
        .iter()
        .filter(|n| n.metadata.branch_id.as_deref() == Some(branch_id) && n.metadata.arm.as_deref() == Some(arm))
        .filter_map(|n| match &n.kind {
            NodeKind::Task { tool, .. } => Some(tool.clone()),
            _ => None,
        })
        .collect()
}

fn matches_from(executed: &[ToolId], cursor: usize, expected: &[ToolId]) -> bool {
    if expected.is_empty() {
        return false;
    }
    if cursor + expected.len() > executed.len() {
        return false;
    }
    executed[cursor..cursor + expected.len()] == *expected
}
