//! # ExecutionGraph
//!
//! Parallel expansion of a [`JobGraph`]: one [`ExecutionVertex`] per subtask,
//! one [`ResultPartition`] per producing subtask, and one [`ExecutionEdge`]
//! per producer/consumer subtask link.
//!
//! The graph is built by a single thread. [`ExecutionGraph::publish`] freezes
//! it and hands out an `Arc` so tasks can read it without locking. Every
//! mutating method checks the frozen flag and fails with
//! [`GraphError::IllegalGraphMutation`] afterwards.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GraphError;
use crate::graph::{
    ChannelId, ConsumerGroup, DistributionPattern, EdgeId, JobGraph, JobVertex, JobVertexId,
    ResultPartition, ResultPartitionId, ShipStrategy,
};

/// Identifies one parallel instance of a job vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionVertexId {
    pub job_vertex: JobVertexId,
    pub subtask_index: usize,
}

impl ExecutionVertexId {
    pub fn new(job_vertex: JobVertexId, subtask_index: usize) -> Self {
        Self {
            job_vertex,
            subtask_index,
        }
    }
}

impl std::fmt::Display for ExecutionVertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.job_vertex, self.subtask_index)
    }
}

/// One parallel instance of a job vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionVertex {
    pub id: ExecutionVertexId,
    pub name: String,
    pub parallelism: usize,
    /// Set when the first outgoing edge of the job vertex is wired.
    pub produced_partition: Option<ResultPartitionId>,
    /// Incoming edges, in wiring order.
    pub inputs: Vec<EdgeId>,
}

impl ExecutionVertex {
    /// Display name in the form `name (2/4)`.
    pub fn task_name(&self) -> String {
        format!(
            "{} ({}/{})",
            self.name,
            self.id.subtask_index + 1,
            self.parallelism
        )
    }
}

/// A concrete producer-subtask-to-consumer-subtask data link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionEdge {
    pub id: EdgeId,
    pub partition: ResultPartitionId,
    pub group_index: usize,
    /// Position inside the consumer group.
    pub subpartition: usize,
    pub channel: ChannelId,
    pub consumer: ExecutionVertexId,
    /// Which logical input of the consumer this edge feeds.
    pub input_slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphState {
    Building,
    Executing,
}

/// The parallel execution plan of a job.
#[derive(Debug)]
pub struct ExecutionGraph {
    job_name: String,
    job_vertices: BTreeMap<JobVertexId, JobVertex>,
    vertices: BTreeMap<ExecutionVertexId, ExecutionVertex>,
    partitions: BTreeMap<ResultPartitionId, ResultPartition>,
    edges: Vec<ExecutionEdge>,
    state: GraphState,
}

impl ExecutionGraph {
    /// Create an empty graph in the building phase.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            job_vertices: BTreeMap::new(),
            vertices: BTreeMap::new(),
            partitions: BTreeMap::new(),
            edges: Vec::new(),
            state: GraphState::Building,
        }
    }

    /// Expand a job graph into its execution graph.
    pub fn build(job: &JobGraph) -> Result<Self, GraphError> {
        let mut graph = Self::new(job.job_name.clone());
        for vertex in &job.vertices {
            graph.add_job_vertex(vertex)?;
        }

        let mut input_slots: HashMap<JobVertexId, usize> = HashMap::new();
        for edge in &job.edges {
            let producer = graph.job_vertex(edge.source).cloned().ok_or_else(|| {
                GraphError::build(format!("edge references unknown source {}", edge.source))
            })?;
            let consumer = graph.job_vertex(edge.target).cloned().ok_or_else(|| {
                GraphError::build(format!("edge references unknown target {}", edge.target))
            })?;

            let slot = input_slots.entry(edge.target).or_insert(0);
            let wired = graph.connect(&producer, &consumer, edge.ship, *slot)?;
            if wired {
                *slot += 1;
            }
        }

        debug!(
            job = %graph.job_name,
            vertices = graph.vertices.len(),
            partitions = graph.partitions.len(),
            edges = graph.edges.len(),
            "built execution graph"
        );
        Ok(graph)
    }

    /// Wire every producer subtask of `producer` to the consumer subtasks the
    /// pattern implies. Returns false when an identical connection existed.
    fn connect(
        &mut self,
        producer: &JobVertex,
        consumer: &JobVertex,
        ship: ShipStrategy,
        input_slot: usize,
    ) -> Result<bool, GraphError> {
        let links = subtask_links(ship.pattern(), producer.parallelism, consumer.parallelism);
        let mut wired = false;
        for (producer_subtask, consumers) in links {
            let partition =
                self.ensure_partition(ExecutionVertexId::new(producer.id, producer_subtask))?;
            if let Some(existing) = self.partitions[&partition].find_group(consumer.id, ship) {
                debug!(%partition, group = existing, "reusing consumer group");
                continue;
            }
            let group = self.add_consumer_group(partition, consumer.id, ship)?;
            for consumer_subtask in consumers {
                self.add_consumer(
                    partition,
                    group,
                    ExecutionVertexId::new(consumer.id, consumer_subtask),
                    input_slot,
                )?;
            }
            wired = true;
        }
        Ok(wired)
    }

    /// Register a job vertex and create its `parallelism` subtasks.
    pub fn add_job_vertex(&mut self, vertex: &JobVertex) -> Result<(), GraphError> {
        self.check_mutable()?;
        if vertex.parallelism == 0 {
            return Err(GraphError::build(format!(
                "vertex {} ({}) has parallelism 0",
                vertex.id, vertex.name
            )));
        }
        if self.job_vertices.contains_key(&vertex.id) {
            return Err(GraphError::build(format!("duplicate vertex id {}", vertex.id)));
        }

        for subtask_index in 0..vertex.parallelism {
            let id = ExecutionVertexId::new(vertex.id, subtask_index);
            self.vertices.insert(
                id,
                ExecutionVertex {
                    id,
                    name: vertex.name.clone(),
                    parallelism: vertex.parallelism,
                    produced_partition: None,
                    inputs: Vec::new(),
                },
            );
        }
        self.job_vertices.insert(vertex.id, vertex.clone());
        Ok(())
    }

    /// Return the producer's partition, creating it on first use.
    pub fn ensure_partition(
        &mut self,
        producer: ExecutionVertexId,
    ) -> Result<ResultPartitionId, GraphError> {
        self.check_mutable()?;
        let vertex = self.vertices.get_mut(&producer).ok_or_else(|| {
            GraphError::build(format!("unknown producer subtask {producer}"))
        })?;
        if let Some(id) = vertex.produced_partition {
            return Ok(id);
        }

        let id = ResultPartitionId::new(producer, 0);
        vertex.produced_partition = Some(id);
        self.partitions.insert(id, ResultPartition::new(id));
        Ok(id)
    }

    /// Append an empty consumer group to `partition`.
    pub fn add_consumer_group(
        &mut self,
        partition: ResultPartitionId,
        target: JobVertexId,
        ship: ShipStrategy,
    ) -> Result<usize, GraphError> {
        self.check_mutable()?;
        let partition = self
            .partitions
            .get_mut(&partition)
            .ok_or(GraphError::UnknownPartition(partition))?;
        Ok(partition.add_consumer_group(target, ship))
    }

    /// Create an edge from `partition` to `consumer` inside the group at
    /// `group_index`.
    pub fn add_consumer(
        &mut self,
        partition_id: ResultPartitionId,
        group_index: usize,
        consumer: ExecutionVertexId,
        input_slot: usize,
    ) -> Result<EdgeId, GraphError> {
        self.check_mutable()?;
        let partition = self
            .partitions
            .get_mut(&partition_id)
            .ok_or(GraphError::UnknownPartition(partition_id))?;
        let len = partition.groups().len();
        let target = partition
            .group(group_index)
            .ok_or(GraphError::IndexOutOfRange {
                index: group_index,
                len,
            })?
            .target;
        if consumer.job_vertex != target {
            return Err(GraphError::build(format!(
                "consumer {consumer} does not belong to group target {target}"
            )));
        }
        let consumer_vertex = self
            .vertices
            .get_mut(&consumer)
            .ok_or_else(|| GraphError::build(format!("unknown consumer subtask {consumer}")))?;

        let id = EdgeId(self.edges.len());
        let channel = ChannelId {
            partition: partition_id,
            index: partition.num_channels(),
        };
        let subpartition = partition.add_consumer(id, group_index)?;
        consumer_vertex.inputs.push(id);
        self.edges.push(ExecutionEdge {
            id,
            partition: partition_id,
            group_index,
            subpartition,
            channel,
            consumer,
            input_slot,
        });
        Ok(id)
    }

    /// Freeze the topology. Later mutations fail.
    pub fn start_execution(&mut self) {
        if self.state == GraphState::Building {
            debug!(job = %self.job_name, "execution graph frozen");
        }
        self.state = GraphState::Executing;
    }

    /// Freeze the topology and publish it to concurrent readers.
    pub fn publish(mut self) -> Arc<Self> {
        self.start_execution();
        Arc::new(self)
    }

    pub fn is_executing(&self) -> bool {
        self.state == GraphState::Executing
    }

    fn check_mutable(&self) -> Result<(), GraphError> {
        match self.state {
            GraphState::Building => Ok(()),
            GraphState::Executing => Err(GraphError::IllegalGraphMutation),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_vertex(&self, id: JobVertexId) -> Option<&JobVertex> {
        self.job_vertices.get(&id)
    }

    pub fn vertex(&self, id: ExecutionVertexId) -> Option<&ExecutionVertex> {
        self.vertices.get(&id)
    }

    /// All execution vertices, ordered by job vertex then subtask.
    pub fn vertices(&self) -> impl Iterator<Item = &ExecutionVertex> {
        self.vertices.values()
    }

    /// Subtasks of one job vertex, in subtask order.
    pub fn subtasks(&self, job_vertex: JobVertexId) -> impl Iterator<Item = &ExecutionVertex> {
        self.vertices
            .range(
                ExecutionVertexId::new(job_vertex, 0)..=ExecutionVertexId::new(job_vertex, usize::MAX),
            )
            .map(|(_, v)| v)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn partition(&self, id: ResultPartitionId) -> Option<&ResultPartition> {
        self.partitions.get(&id)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &ResultPartition> {
        self.partitions.values()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&ExecutionEdge> {
        self.edges.get(id.0)
    }

    pub fn edges(&self) -> &[ExecutionEdge] {
        &self.edges
    }

    /// Edges of one consumer group, in subpartition order.
    pub fn group_edges<'a>(
        &'a self,
        group: &'a ConsumerGroup,
    ) -> impl Iterator<Item = &'a ExecutionEdge> + 'a {
        group.edges().iter().map(move |id| &self.edges[id.0])
    }

    /// Incoming edges of a vertex, in wiring order.
    pub fn input_edges(&self, vertex: ExecutionVertexId) -> Vec<&ExecutionEdge> {
        self.vertices
            .get(&vertex)
            .map(|v| v.inputs.iter().map(|id| &self.edges[id.0]).collect())
            .unwrap_or_default()
    }
}

/// Producer subtask -> consumer subtask ranges for a pattern.
///
/// Pointwise follows the usual rules: equal parallelism links `i -> i`; with
/// more producers, producer `i` feeds consumer `i * c / p`; with fewer
/// producers, producer `i` feeds `[i * c / p, (i + 1) * c / p)`.
pub(crate) fn subtask_links(
    pattern: DistributionPattern,
    producers: usize,
    consumers: usize,
) -> Vec<(usize, Range<usize>)> {
    match pattern {
        DistributionPattern::Broadcast | DistributionPattern::Partitioned => {
            (0..producers).map(|p| (p, 0..consumers)).collect()
        }
        DistributionPattern::Pointwise if producers >= consumers => (0..producers)
            .map(|p| {
                let c = p * consumers / producers;
                (p, c..c + 1)
            })
            .collect(),
        DistributionPattern::Pointwise => (0..producers)
            .map(|p| (p, p * consumers / producers..(p + 1) * consumers / producers))
            .collect(),
    }
}

#[cfg(test)]
#[path = "tests/execution_graph_tests.rs"]
mod tests;
