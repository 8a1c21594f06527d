//! # crabflow core
//!
//! Execution core of the crabflow dataflow engine.
//!
//! - [`graph`]: Logical [`JobGraph`](graph::JobGraph) and its parallel
//!   expansion, the [`ExecutionGraph`](graph::ExecutionGraph), with result
//!   partitions split into consumer groups.
//! - [`network`]: In-process channels: [`InputChannelGate`](network::InputChannelGate)
//!   merges a vertex's inputs in arrival order, [`OutputChannelGate`](network::OutputChannelGate)
//!   routes records through each consumer group's selector.
//! - [`runtime`]: Channel selectors, the task model and the
//!   [`LocalExecutor`](runtime::LocalExecutor).
//! - [`iteration`]: [`IterationBroker`](iteration::IterationBroker) for
//!   superstep handoffs between paired tasks.
//! - [`time`] and [`window`]: Watermark alignment, event-time window
//!   assignment, triggers and buffering.
//! - [`types`]: [`StreamElement`](types::StreamElement),
//!   [`StreamRecord`](types::StreamRecord) and [`Watermark`](types::Watermark).

pub mod config;
pub mod error;
pub mod graph;
pub mod iteration;
pub mod network;
pub mod runtime;
pub mod time;
pub mod types;
pub mod window;

pub use config::ExecutorConfig;
pub use error::{BrokerError, GateError, GraphError, RoutingError, TaskError, WindowError};
