//! Static Structure Builder (C4): parses a code snippet into a typed graph
//! of tool-call nodes and data-flow edges, without executing the code.

mod builder;
mod parser;
mod types;

pub use builder::{build, infer_decisions, validate};
pub use parser::{parse_statements, Stmt};
pub use types::{
    ArgumentRef, BranchArm, Decision, Edge, EdgeKind, LoopType, Node, NodeId, NodeKind,
    NodeMetadata, StaticStructure,
};
