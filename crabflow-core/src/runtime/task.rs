//! Task execution model.
//!
//! Every execution vertex runs as one task on its own thread. The operator
//! body is an [`Invokable`]; everything it may touch at runtime is handed to
//! it through a [`TaskContext`].
//!
//! # Task Loop
//!
//! ```text
//! loop {
//!     match ctx.next_input()? {
//!         Record(rec)    => process(rec) -> ctx.emit(..)
//!         Watermark(wm)  => fire windows -> ctx.emit_watermark(wm)
//!         End            => break
//!     }
//! }
//! ```
//!
//! `next_input` is the only place a streaming task blocks on data, and it
//! returns [`TaskError::Cancelled`] as soon as the job is cancelled.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::error::TaskError;
use crate::graph::ExecutionVertexId;
use crate::iteration::IterationBroker;
use crate::network::{ChannelState, GateEvent, GateOutput, InputChannelGate, OutputChannelGate};
use crate::runtime::CancellationToken;
use crate::time::WatermarkTracker;
use crate::types::{EventTime, StreamElement, StreamRecord, Watermark};

/// The operator body run by a task.
pub trait Invokable<T, V>: Send {
    fn invoke(&mut self, ctx: &mut TaskContext<T, V>) -> Result<(), TaskError>;
}

impl<T, V, F> Invokable<T, V> for F
where
    F: FnMut(&mut TaskContext<T, V>) -> Result<(), TaskError> + Send,
{
    fn invoke(&mut self, ctx: &mut TaskContext<T, V>) -> Result<(), TaskError> {
        self(ctx)
    }
}

/// What a streaming task reads next.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskInput<T> {
    Record(StreamRecord<T>),
    /// The gate-wide watermark advanced.
    Watermark(Watermark),
    /// Every input channel finished.
    End,
}

/// Input side of a task: the gate, its notification stream and watermark
/// alignment across its channels.
struct TaskInputs<T> {
    gate: InputChannelGate<T>,
    events: Receiver<GateEvent>,
    tracker: WatermarkTracker,
    // Channels reported closed whose buffered elements are not yet drained.
    closing: Vec<usize>,
    pending_watermark: Option<Watermark>,
    idle_timeout: Option<Duration>,
}

/// Runtime handle given to an [`Invokable`].
pub struct TaskContext<T, V> {
    vertex: ExecutionVertexId,
    task_name: String,
    parallelism: usize,
    inputs: Option<TaskInputs<T>>,
    output: Option<OutputChannelGate<T>>,
    broker: Arc<IterationBroker<V>>,
    broker_wait: Option<Duration>,
    cancel: CancellationToken,
}

impl<T, V: Send> TaskContext<T, V> {
    pub(crate) fn new(
        vertex: ExecutionVertexId,
        task_name: String,
        parallelism: usize,
        broker: Arc<IterationBroker<V>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            vertex,
            task_name,
            parallelism,
            inputs: None,
            output: None,
            broker,
            broker_wait: None,
            cancel,
        }
    }

    /// Attach the input gate. The task's event receiver becomes the gate's
    /// listener.
    pub(crate) fn with_input(
        mut self,
        gate: InputChannelGate<T>,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, TaskError> {
        let (tx, events) = crossbeam_channel::unbounded();
        gate.register_listener(tx)?;
        let tracker = match idle_timeout {
            Some(timeout) => WatermarkTracker::with_idle_timeout(gate.num_channels(), timeout),
            None => WatermarkTracker::new(gate.num_channels()),
        };
        // Channels that closed before registration send no event.
        let closing = (0..gate.num_channels())
            .filter(|&channel| gate.channel_state(channel) == Some(ChannelState::Closed))
            .collect();
        self.inputs = Some(TaskInputs {
            gate,
            events,
            tracker,
            closing,
            pending_watermark: None,
            idle_timeout,
        });
        Ok(self)
    }

    pub(crate) fn with_output(mut self, gate: OutputChannelGate<T>) -> Self {
        self.output = Some(gate);
        self
    }

    pub(crate) fn with_broker_wait(mut self, wait: Option<Duration>) -> Self {
        self.broker_wait = wait;
        self
    }

    pub fn vertex(&self) -> ExecutionVertexId {
        self.vertex
    }

    pub fn subtask_index(&self) -> usize {
        self.vertex.subtask_index
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Display name in the form `name (2/4)`.
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`TaskError::Cancelled`] if the job was cancelled. For
    /// source loops that never block on a gate.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn has_input(&self) -> bool {
        self.inputs.is_some()
    }

    /// Notifications of the input gate: channel availability and closes.
    pub fn events(&self) -> Option<&Receiver<GateEvent>> {
        self.inputs.as_ref().map(|inputs| &inputs.events)
    }

    /// Block for the next raw element of the input gate, with the index of
    /// the channel that carried it. `None` once every channel finished, or
    /// immediately for a task without inputs.
    pub fn next_element(&mut self) -> Result<Option<(usize, StreamElement<T>)>, TaskError> {
        let Some(inputs) = self.inputs.as_mut() else {
            return Ok(None);
        };
        match inputs.gate.next(&self.cancel)? {
            GateOutput::Element { channel, element } => Ok(Some((channel, element))),
            GateOutput::EndOfStream => Ok(None),
        }
    }

    /// Block for the next record or gate-wide watermark.
    ///
    /// Per-channel watermarks are aligned: only an advance of the minimum
    /// across channels is reported. Finished channels stop holding the
    /// watermark back once their buffered elements are drained, so the last
    /// watermark before [`TaskInput::End`] is
    /// [`EVENT_TIME_MAX`](crate::time::EVENT_TIME_MAX).
    pub fn next_input(&mut self) -> Result<TaskInput<T>, TaskError> {
        let Some(inputs) = self.inputs.as_mut() else {
            return Ok(TaskInput::End);
        };
        loop {
            if let Some(wm) = inputs.pending_watermark.take() {
                return Ok(TaskInput::Watermark(wm));
            }

            let output = match inputs.idle_timeout {
                Some(interval) => match inputs.gate.next_timeout(&self.cancel, interval)? {
                    Some(output) => output,
                    None => {
                        if let Some(wm) = inputs.tracker.detect_idle_channels() {
                            return Ok(TaskInput::Watermark(wm));
                        }
                        continue;
                    }
                },
                None => inputs.gate.next(&self.cancel)?,
            };

            let mut settled = inputs.settle_closed_channels();
            let input = match output {
                GateOutput::EndOfStream => {
                    for channel in 0..inputs.gate.num_channels() {
                        if let Some(wm) = inputs.tracker.finish(channel) {
                            settled = Some(wm);
                        }
                    }
                    Some(TaskInput::End)
                }
                GateOutput::Element {
                    channel,
                    element: StreamElement::Record(record),
                } => {
                    inputs.tracker.record_activity(channel);
                    Some(TaskInput::Record(record))
                }
                GateOutput::Element {
                    channel,
                    element: StreamElement::Watermark(wm),
                } => inputs
                    .tracker
                    .advance(channel, wm)
                    .map(TaskInput::Watermark),
            };

            match (input, settled) {
                // End is reported again on the next call.
                (Some(TaskInput::End), Some(wm)) => return Ok(TaskInput::Watermark(wm)),
                (Some(TaskInput::Watermark(wm)), _) => return Ok(TaskInput::Watermark(wm)),
                (Some(input), settled) => {
                    inputs.pending_watermark = settled;
                    return Ok(input);
                }
                (None, Some(wm)) => return Ok(TaskInput::Watermark(wm)),
                (None, None) => continue,
            }
        }
    }

    /// The gate-wide watermark reported so far.
    pub fn current_watermark(&self) -> Option<EventTime> {
        self.inputs.as_ref().map(|inputs| inputs.tracker.current())
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Emit a record to every downstream consumer group. Discarded when the
    /// task has no consumers.
    pub fn emit(&self, record: StreamRecord<T>) -> Result<(), TaskError>
    where
        T: Clone,
    {
        match &self.output {
            Some(gate) => Ok(gate.emit(record)?),
            None => Ok(()),
        }
    }

    pub fn emit_value(&self, value: T) -> Result<(), TaskError>
    where
        T: Clone,
    {
        self.emit(StreamRecord::new(value))
    }

    pub fn emit_watermark(&self, timestamp: EventTime) -> Result<(), TaskError>
    where
        T: Clone,
    {
        match &self.output {
            Some(gate) => Ok(gate.emit_watermark(timestamp)?),
            None => Ok(()),
        }
    }

    /// Close the output channels so consumers see end of stream.
    pub(crate) fn close_output(&mut self) {
        if let Some(gate) = self.output.as_mut() {
            gate.close();
        }
    }

    pub fn broker(&self) -> &Arc<IterationBroker<V>> {
        &self.broker
    }

    /// Hand a shared object to the paired task of this superstep.
    pub fn hand_in(&self, key: &str, value: V) -> Result<(), TaskError> {
        Ok(self.broker.hand_in(key, value)?)
    }

    /// Wait for the object the paired task handed in under `key`.
    ///
    /// Honours the configured broker wait and the task's cancellation.
    pub fn get_and_remove(&self, key: &str) -> Result<V, TaskError> {
        let value = match self.broker_wait {
            Some(timeout) => self
                .broker
                .get_and_remove_cancellable_timeout(key, &self.cancel, timeout)?,
            None => self.broker.get_and_remove_cancellable(key, &self.cancel)?,
        };
        Ok(value)
    }
}

impl<T> TaskInputs<T> {
    /// Finish channels that closed and have nothing buffered any more.
    /// Returns the watermark if that let it advance.
    fn settle_closed_channels(&mut self) -> Option<Watermark> {
        for event in self.events.try_iter() {
            if let GateEvent::ChannelClosed { channel, .. } = event {
                self.closing.push(channel);
            }
        }
        let mut advanced = None;
        let gate = &self.gate;
        let tracker = &mut self.tracker;
        self.closing.retain(|&channel| {
            if gate.pending(channel) > 0 {
                return true;
            }
            if let Some(wm) = tracker.finish(channel) {
                advanced = Some(wm);
            }
            false
        });
        advanced
    }
}
