//! Result partitions and their consumer groups.
//!
//! A [`ResultPartition`] is the output of one producer subtask. It is split
//! into [`ConsumerGroup`]s, one per distinct downstream fan-out. Groups hold
//! [`EdgeId`]s into the execution graph's edge arena; the position of an edge
//! inside its group is the channel number a selector routes to.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::{DistributionPattern, ExecutionVertexId, JobVertexId, ShipStrategy};

/// Identifies a result partition: the producer subtask plus a partition
/// index unique within that producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultPartitionId {
    pub producer: ExecutionVertexId,
    pub partition_index: usize,
}

impl ResultPartitionId {
    pub fn new(producer: ExecutionVertexId, partition_index: usize) -> Self {
        Self {
            producer,
            partition_index,
        }
    }
}

impl std::fmt::Display for ResultPartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/p{}", self.producer, self.partition_index)
    }
}

/// Index of an edge in the execution graph's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

/// A unidirectional transport between one output and one input side,
/// identified by its partition and an index unique within that partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub partition: ResultPartitionId,
    pub index: usize,
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/c{}", self.partition, self.index)
    }
}

/// Edges of one partition that share a fan-out semantics and a target vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup {
    pub target: JobVertexId,
    pub ship: ShipStrategy,
    edges: Vec<EdgeId>,
}

impl ConsumerGroup {
    pub fn pattern(&self) -> DistributionPattern {
        self.ship.pattern()
    }

    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Number of channels a selector for this group routes over.
    pub fn num_channels(&self) -> usize {
        self.edges.len()
    }
}

/// One producer subtask's output, split into consumer groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPartition {
    id: ResultPartitionId,
    groups: Vec<ConsumerGroup>,
    num_channels: usize,
}

impl ResultPartition {
    pub fn new(id: ResultPartitionId) -> Self {
        Self {
            id,
            groups: Vec::new(),
            num_channels: 0,
        }
    }

    pub fn id(&self) -> ResultPartitionId {
        self.id
    }

    pub fn producer(&self) -> ExecutionVertexId {
        self.id.producer
    }

    /// Append an empty consumer group and return its index.
    pub fn add_consumer_group(&mut self, target: JobVertexId, ship: ShipStrategy) -> usize {
        self.groups.push(ConsumerGroup {
            target,
            ship,
            edges: Vec::new(),
        });
        self.groups.len() - 1
    }

    /// Append `edge` to the group at `group_index`.
    ///
    /// Returns the edge's position inside the group.
    pub fn add_consumer(&mut self, edge: EdgeId, group_index: usize) -> Result<usize, GraphError> {
        let len = self.groups.len();
        let group = self
            .groups
            .get_mut(group_index)
            .ok_or(GraphError::IndexOutOfRange {
                index: group_index,
                len,
            })?;
        group.edges.push(edge);
        self.num_channels += 1;
        Ok(group.edges.len() - 1)
    }

    pub fn groups(&self) -> &[ConsumerGroup] {
        &self.groups
    }

    pub fn group(&self, group_index: usize) -> Option<&ConsumerGroup> {
        self.groups.get(group_index)
    }

    /// Find the group that already realizes `ship` towards `target`.
    pub fn find_group(&self, target: JobVertexId, ship: ShipStrategy) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.target == target && g.ship == ship)
    }

    /// Total number of outgoing channels across all groups.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
}

#[cfg(test)]
#[path = "tests/result_partition_tests.rs"]
mod tests;
