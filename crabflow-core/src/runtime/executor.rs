//! In-process execution of a published [`ExecutionGraph`].
//!
//! Every execution vertex runs as one task on its own named thread. Channels
//! are wired from the graph before any task starts:
//!
//! - one [`InputChannelGate`] per consuming vertex, channel `i` fed by the
//!   edge at `vertex.inputs[i]`
//! - one [`OutputChannelGate`] per produced partition, one group per consumer
//!   group, writers in subpartition order
//!
//! A task that fails cancels the whole job: the shared token is cancelled and
//! the iteration broker shut down, so no task stays blocked on a gate or a
//! handoff.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::TaskError;
use crate::graph::{EdgeId, ExecutionGraph, ExecutionVertex, ExecutionVertexId};
use crate::iteration::IterationBroker;
use crate::network::{ChannelWriter, GroupOutput, InputChannelGate, OutputChannelGate};
use crate::runtime::{selector_for, CancellationToken, Invokable, KeyFields, TaskContext};
use crate::types::StreamData;

/// How one task ended.
#[derive(Debug)]
pub struct TaskOutcome {
    pub vertex: ExecutionVertexId,
    pub name: String,
    pub result: Result<(), TaskError>,
}

/// Outcomes of every task of a job, in vertex order.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub tasks: Vec<TaskOutcome>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|task| task.result.is_ok())
    }

    /// True when some task stopped on cancellation and none failed otherwise.
    pub fn was_cancelled(&self) -> bool {
        self.first_failure().is_none()
            && self
                .tasks
                .iter()
                .any(|task| matches!(&task.result, Err(err) if err.is_cancellation()))
    }

    /// The first task that failed for a reason other than cancellation.
    pub fn first_failure(&self) -> Option<&TaskOutcome> {
        self.tasks
            .iter()
            .find(|task| matches!(&task.result, Err(err) if !err.is_cancellation()))
    }
}

/// Cancels a running job from any thread.
pub struct CancelHandle<V> {
    token: CancellationToken,
    broker: Arc<IterationBroker<V>>,
}

impl<V> Clone for CancelHandle<V> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            broker: Arc::clone(&self.broker),
        }
    }
}

impl<V: Send> CancelHandle<V> {
    /// Cancel every task and wake every broker waiter. Idempotent.
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        let woken = self.broker.shutdown();
        info!(woken, "job cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct RunningTask {
    vertex: ExecutionVertexId,
    name: String,
    handle: JoinHandle<Result<(), TaskError>>,
}

/// Runs all tasks of one job on local threads.
///
/// `T` is the record type on every channel, `V` the type of objects handed
/// over through the iteration broker.
pub struct LocalExecutor<T, V> {
    graph: Arc<ExecutionGraph>,
    config: ExecutorConfig,
    broker: Arc<IterationBroker<V>>,
    cancel: CancellationToken,
    running: Vec<RunningTask>,
    _records: PhantomData<fn() -> T>,
}

impl<T, V> LocalExecutor<T, V>
where
    T: StreamData + KeyFields,
    V: Send + 'static,
{
    pub fn new(graph: Arc<ExecutionGraph>, config: ExecutorConfig) -> Self {
        Self {
            graph,
            config,
            broker: Arc::new(IterationBroker::new()),
            cancel: CancellationToken::new(),
            running: Vec::new(),
            _records: PhantomData,
        }
    }

    pub fn graph(&self) -> &Arc<ExecutionGraph> {
        &self.graph
    }

    pub fn broker(&self) -> &Arc<IterationBroker<V>> {
        &self.broker
    }

    pub fn cancel_handle(&self) -> CancelHandle<V> {
        CancelHandle {
            token: self.cancel.clone(),
            broker: Arc::clone(&self.broker),
        }
    }

    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Number of task threads started.
    pub fn num_tasks(&self) -> usize {
        self.running.len()
    }

    /// Wire the channels and start one thread per execution vertex.
    ///
    /// `factory` is called once per vertex, in vertex order, for the body the
    /// task runs. The graph must already be published.
    pub fn start<F>(&mut self, mut factory: F) -> Result<()>
    where
        F: FnMut(&ExecutionVertex) -> Box<dyn Invokable<T, V>>,
    {
        if !self.graph.is_executing() {
            bail!(
                "execution graph of job '{}' must be published before it runs",
                self.graph.job_name()
            );
        }
        if !self.running.is_empty() {
            bail!("job '{}' was already started", self.graph.job_name());
        }

        let (mut inputs, mut writers) = self.wire_inputs();
        let mut outputs = self.wire_outputs(&mut writers)?;
        if !writers.is_empty() {
            warn!(count = writers.len(), "input channels without a producer");
        }

        let graph = Arc::clone(&self.graph);
        for vertex in graph.vertices() {
            let name = vertex.task_name();
            let mut ctx = TaskContext::new(
                vertex.id,
                name.clone(),
                vertex.parallelism,
                Arc::clone(&self.broker),
                self.cancel.clone(),
            )
            .with_broker_wait(self.config.broker_wait);
            if let Some(gate) = inputs.remove(&vertex.id) {
                ctx = ctx.with_input(gate, self.config.watermark_idle_timeout)?;
            }
            if let Some(gate) = outputs.remove(&vertex.id) {
                ctx = ctx.with_output(gate);
            }

            let invokable = factory(vertex);
            let job = self.cancel_handle();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.config.thread_name_prefix, vertex.id))
                .spawn(move || run_task(invokable, ctx, job));
            match spawned {
                Ok(handle) => self.running.push(RunningTask {
                    vertex: vertex.id,
                    name,
                    handle,
                }),
                Err(err) => {
                    self.cancel();
                    return Err(err).with_context(|| format!("failed to spawn task {name}"));
                }
            }
        }
        info!(
            job = %self.graph.job_name(),
            tasks = self.running.len(),
            "job started"
        );
        Ok(())
    }

    /// Wait for every task to end.
    pub fn join(mut self) -> JobOutcome {
        let mut outcome = JobOutcome::default();
        for task in self.running.drain(..) {
            let result = match task.handle.join() {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            outcome.tasks.push(TaskOutcome {
                vertex: task.vertex,
                name: task.name,
                result,
            });
        }
        match outcome.first_failure() {
            Some(failed) => error!(
                job = %self.graph.job_name(),
                task = %failed.name,
                "job failed"
            ),
            None if outcome.was_cancelled() => info!(job = %self.graph.job_name(), "job cancelled"),
            None => info!(job = %self.graph.job_name(), "job finished"),
        }
        outcome
    }

    /// Start the job and wait for it to end.
    pub fn run<F>(mut self, factory: F) -> Result<JobOutcome>
    where
        F: FnMut(&ExecutionVertex) -> Box<dyn Invokable<T, V>>,
    {
        self.start(factory)?;
        Ok(self.join())
    }

    fn wire_inputs(
        &self,
    ) -> (
        HashMap<ExecutionVertexId, InputChannelGate<T>>,
        HashMap<EdgeId, ChannelWriter<T>>,
    ) {
        let mut gates = HashMap::new();
        let mut writers = HashMap::new();
        for vertex in self.graph.vertices() {
            if vertex.inputs.is_empty() {
                continue;
            }
            let (gate, gate_writers) = InputChannelGate::new(vertex.id, vertex.inputs.len());
            writers.extend(vertex.inputs.iter().copied().zip(gate_writers));
            gates.insert(vertex.id, gate);
        }
        (gates, writers)
    }

    fn wire_outputs(
        &self,
        writers: &mut HashMap<EdgeId, ChannelWriter<T>>,
    ) -> Result<HashMap<ExecutionVertexId, OutputChannelGate<T>>> {
        let mut outputs = HashMap::new();
        for partition in self.graph.partitions() {
            let mut gate = OutputChannelGate::new(partition.producer());
            for group in partition.groups() {
                let group_writers = group
                    .edges()
                    .iter()
                    .map(|edge| {
                        writers
                            .remove(edge)
                            .with_context(|| format!("edge {} of {} has no channel", edge.0, partition.id()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                gate.add_group(GroupOutput::new(
                    group.target,
                    selector_for::<T>(group.ship),
                    group_writers,
                ));
            }
            debug!(
                partition = %partition.id(),
                groups = gate.num_groups(),
                channels = gate.num_channels(),
                "output gate wired"
            );
            outputs.insert(partition.producer(), gate);
        }
        Ok(outputs)
    }
}

impl<T, V> Drop for LocalExecutor<T, V> {
    fn drop(&mut self) {
        // Tasks still running when the executor goes away are cancelled,
        // including those blocked in the broker.
        if !self.running.is_empty() && !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.broker.shutdown();
        }
    }
}

fn run_task<T, V: Send>(
    mut invokable: Box<dyn Invokable<T, V>>,
    mut ctx: TaskContext<T, V>,
    job: CancelHandle<V>,
) -> Result<(), TaskError> {
    let name = ctx.task_name().to_string();
    debug!(task = %name, "task started");

    let result = match panic::catch_unwind(AssertUnwindSafe(|| invokable.invoke(&mut ctx))) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    };

    match &result {
        Ok(()) => {
            ctx.close_output();
            debug!(task = %name, "task finished");
        }
        Err(err) if err.is_cancellation() => debug!(task = %name, "task cancelled"),
        Err(err) => {
            error!(task = %name, error = %err, "task failed; cancelling job");
            job.cancel();
        }
    }
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
