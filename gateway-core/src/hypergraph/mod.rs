//! DR-DSP (C5): incremental shortest-hyperpath engine over the dynamic
//! directed hypergraph of tools and capabilities.

mod engine;
mod store;
mod types;

pub use engine::find_shortest_hyperpath;
pub use store::HypergraphStore;
pub use types::{
    capability_edge_weight, tool_edge_weight, Hyperedge, HypergraphUpdate, HyperpathResult,
    NodeKind,
};
