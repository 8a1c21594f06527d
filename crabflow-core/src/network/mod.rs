//! Network-domain modules for local channels and gate abstractions.

pub mod channel;
pub mod input_gate;
pub mod output_gate;

pub use channel::*;
pub use input_gate::*;
pub use output_gate::*;

use crate::graph::ExecutionVertexId;

/// Gates are owned one per execution vertex and named after it.
pub type GateId = ExecutionVertexId;

/// Notification delivered to the task that owns an input gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// The channel went from empty to holding data.
    ChannelAvailable { gate: GateId, channel: usize },
    /// The channel's writer finished.
    ChannelClosed { gate: GateId, channel: usize },
}
