//! Plan Builder & Optimizer (C8): lowers a validated static structure to a
//! fused, layered physical DAG ready for the controlled executor.

mod builder;
mod types;

pub use builder::build_physical_dag;
pub use types::{LogicalTask, PhysicalDag, PhysicalTask, PlanOptions};
