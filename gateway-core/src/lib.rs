//! # gateway-core
//!
//! A capability-learning execution gateway: given an intent and a small
//! tool-calling code snippet, builds a validated task DAG, executes it under
//! bounded concurrency and human approval gates, and learns from the
//! outcome so the next matching intent can be served by name instead of by
//! code.
//!
//! ## Core components
//!
//! - **`vector`**: the embedding boundary (C1)
//! - **`tool`**: tool identity and the in-process tool registry
//! - **`capability`**: the capability registry and its underlying workflow
//!   patterns (C2)
//! - **`trace`**: append-only execution traces feeding prioritized replay
//!   (C3)
//! - **`static_structure`**: parses a code snippet into a typed task DAG
//!   without executing it (C4)
//! - **`hypergraph`**: the DR-DSP shortest-hyperpath engine over tools and
//!   capabilities (C5)
//! - **`ranker`**: the SHGAT attention ranker scoring capabilities against
//!   an intent (C6)
//! - **`threshold`**: the Thompson sampling approval-threshold manager (C7)
//! - **`plan`**: lowers a static structure to a fused, layered physical DAG
//!   (C8)
//! - **`executor`**: runs a physical DAG with bounded concurrency,
//!   checkpointing, and approval gates (C9)
//! - **`handler`**: the execute entry point dispatching across all request
//!   modes (C10)

pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod hypergraph;
pub mod ids;
pub mod plan;
pub mod ranker;
pub mod static_structure;
pub mod store;
pub mod threshold;
pub mod tool;
pub mod trace;
pub mod vector;

pub use config::GatewayConfig;
pub use error::{Error, ErrorKind, Result};
pub use handler::{
    AcceptSuggestion, ContinueWorkflow, DagSummary, ExecuteArgs, ExecuteOptions, ExecuteResponse,
    Gateway, SuggestionCandidate, Suggestions,
};
pub use ids::{CapabilityId, CheckpointId, TraceId, WorkflowId};
