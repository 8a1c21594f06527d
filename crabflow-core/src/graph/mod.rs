//! Graph-domain modules: logical JobGraph and its parallel ExecutionGraph.

pub mod execution_graph;
pub mod job_graph;
pub mod result_partition;

pub use execution_graph::*;
pub use job_graph::*;
pub use result_partition::*;
