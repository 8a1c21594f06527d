//! # JobGraph
//!
//! Logical job description handed to the execution core: vertices with a
//! declared parallelism and edges with a ship strategy.
//!
//! The JobGraph is not validated on construction. [`ExecutionGraph::build`]
//! rejects unknown vertex ids, zero parallelism and duplicate vertices.
//!
//! [`ExecutionGraph::build`]: crate::graph::ExecutionGraph::build

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A unique identifier for a job vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobVertexId(pub u32);

impl std::fmt::Display for JobVertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vertex_{}", self.0)
    }
}

/// How a consumer job vertex reads a producer's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionPattern {
    /// Every consumer subtask receives every record.
    Broadcast,
    /// Every producer subtask connects to every consumer subtask, and each
    /// record goes to exactly one of them.
    Partitioned,
    /// Each producer subtask connects to a subset of consumer subtasks.
    Pointwise,
}

/// Routing rule attached to a job edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipStrategy {
    /// Route by the partition tag a keying stage already assigned.
    Forward,
    /// Route by the hash of the record field at `key_position`.
    FieldsHash { key_position: usize },
    /// Send to all downstream instances.
    Broadcast,
    /// Connect producer and consumer subtasks one-to-one (or one-to-few).
    Pointwise,
}

impl ShipStrategy {
    /// The consumption pattern this strategy implies.
    pub fn pattern(&self) -> DistributionPattern {
        match self {
            ShipStrategy::Broadcast => DistributionPattern::Broadcast,
            ShipStrategy::Forward | ShipStrategy::FieldsHash { .. } => {
                DistributionPattern::Partitioned
            }
            ShipStrategy::Pointwise => DistributionPattern::Pointwise,
        }
    }
}

/// A logical vertex of the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVertex {
    pub id: JobVertexId,
    pub name: String,
    pub parallelism: usize,
}

/// An edge in the JobGraph connecting two vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEdge {
    pub source: JobVertexId,
    pub target: JobVertexId,
    pub ship: ShipStrategy,
}

/// The logical plan of a job, consumed by the execution graph builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobGraph {
    pub job_name: String,
    pub vertices: Vec<JobVertex>,
    #[serde(default)]
    pub edges: Vec<JobEdge>,
}

impl JobGraph {
    /// Create an empty JobGraph.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Self::default()
        }
    }

    /// Add a vertex and return its ID.
    pub fn add_vertex(&mut self, name: impl Into<String>, parallelism: usize) -> JobVertexId {
        let id = JobVertexId(
            self.vertices
                .iter()
                .map(|v| v.id.0 + 1)
                .max()
                .unwrap_or(0),
        );
        self.vertices.push(JobVertex {
            id,
            name: name.into(),
            parallelism,
        });
        id
    }

    /// Add an edge between two vertices.
    pub fn add_edge(&mut self, source: JobVertexId, target: JobVertexId, ship: ShipStrategy) {
        self.edges.push(JobEdge {
            source,
            target,
            ship,
        });
    }

    /// Look up a vertex by id.
    pub fn vertex(&self, id: JobVertexId) -> Option<&JobVertex> {
        self.vertices.iter().find(|v| v.id == id)
    }

    /// Serialize the plan for shipping to another process.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }

    /// Render the plan as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a hand-written JSON plan.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
#[path = "tests/job_graph_tests.rs"]
mod tests;
