//! Error types for each domain of the execution core.
//!
//! Structural errors ([`GraphError`], [`RoutingError`], [`WindowError`]) are
//! raised while a job is being wired and abort construction. Runtime errors
//! ([`GateError`], [`BrokerError`]) are scoped to a single channel or task.

use thiserror::Error;

use crate::graph::ResultPartitionId;

/// Errors raised while building or mutating an execution graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("malformed job graph: {reason}")]
    GraphBuild { reason: String },
    #[error("execution graph is read-only once execution has started")]
    IllegalGraphMutation,
    #[error("consumer group index {index} out of range ({len} groups)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unknown result partition {0}")]
    UnknownPartition(ResultPartitionId),
}

impl GraphError {
    pub(crate) fn build(reason: impl Into<String>) -> Self {
        Self::GraphBuild {
            reason: reason.into(),
        }
    }
}

/// Errors raised by channel selectors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("number of channels must be positive")]
    InvalidChannelCount,
    #[error("record has no key field at position {position}")]
    KeyFieldOutOfRange { position: usize },
    #[error("forward routing requires a record with a partition tag")]
    MissingPartitionTag,
}

/// Errors surfaced by input and output channel gates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("a listener is already registered on this gate")]
    ListenerAlreadyRegistered,
    #[error("read error on channel {channel}: {reason}")]
    ChannelRead { channel: usize, reason: String },
    #[error("channel {channel}: receiving gate was dropped")]
    ReceiverDropped { channel: usize },
    #[error("channel {channel} is already closed")]
    ChannelClosed { channel: usize },
    #[error("task was cancelled")]
    TaskCancelled,
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Errors returned by the iteration broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("key {key:?} already holds an unclaimed value")]
    DuplicateHandoff { key: String },
    #[error("handoff for key {key:?} was cancelled")]
    BrokerCancelled { key: String },
}

/// Errors raised when configuring window assigners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("window size must be positive, got {0}ms")]
    InvalidSize(i64),
    #[error("window slide must be positive, got {0}ms")]
    InvalidSlide(i64),
}

/// Terminal outcome of a failed task.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,
    #[error(transparent)]
    Gate(GateError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<GateError> for TaskError {
    fn from(err: GateError) -> Self {
        // Cancellation is a task-level outcome, not a gate fault.
        match err {
            GateError::TaskCancelled => TaskError::Cancelled,
            other => TaskError::Gate(other),
        }
    }
}

impl TaskError {
    /// True when the task stopped because it was cancelled, either directly
    /// or while blocked in the broker.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TaskError::Cancelled | TaskError::Broker(BrokerError::BrokerCancelled { .. })
        )
    }
}
