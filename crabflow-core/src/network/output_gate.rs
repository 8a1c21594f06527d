//! OutputChannelGate for sending to the consumer groups of one partition.
//!
//! - One [`GroupOutput`] per consumer group, holding that group's selector and
//!   its channel writers in subpartition order
//! - Records are routed independently through every group
//! - Watermarks go to every channel of every group

use tracing::debug;

use crate::error::GateError;
use crate::graph::{ExecutionVertexId, JobVertexId};
use crate::network::ChannelWriter;
use crate::runtime::ChannelSelector;
use crate::types::{EventTime, StreamElement, StreamRecord, Watermark};

/// The writing side of one consumer group.
pub struct GroupOutput<T> {
    target: JobVertexId,
    selector: Box<dyn ChannelSelector<T>>,
    writers: Vec<ChannelWriter<T>>,
}

impl<T> GroupOutput<T> {
    /// `writers[i]` must be the channel of the group's edge at subpartition `i`.
    pub fn new(
        target: JobVertexId,
        selector: Box<dyn ChannelSelector<T>>,
        writers: Vec<ChannelWriter<T>>,
    ) -> Self {
        Self {
            target,
            selector,
            writers,
        }
    }

    pub fn target(&self) -> JobVertexId {
        self.target
    }

    pub fn num_channels(&self) -> usize {
        self.writers.len()
    }
}

impl<T> std::fmt::Debug for GroupOutput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupOutput")
            .field("target", &self.target)
            .field("writers", &self.writers)
            .finish()
    }
}

/// OutputChannelGate sends a producer's records to its downstream consumers.
pub struct OutputChannelGate<T> {
    producer: ExecutionVertexId,
    groups: Vec<GroupOutput<T>>,
}

impl<T> OutputChannelGate<T> {
    pub fn new(producer: ExecutionVertexId) -> Self {
        Self {
            producer,
            groups: Vec::new(),
        }
    }

    /// Append a group. Groups must be added in consumer group index order.
    pub fn add_group(&mut self, group: GroupOutput<T>) -> usize {
        self.groups.push(group);
        self.groups.len() - 1
    }

    pub fn producer(&self) -> ExecutionVertexId {
        self.producer
    }

    pub fn groups(&self) -> &[GroupOutput<T>] {
        &self.groups
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Total number of channels across all groups.
    pub fn num_channels(&self) -> usize {
        self.groups.iter().map(GroupOutput::num_channels).sum()
    }

    /// Close every channel. Consumers see end of stream once drained.
    pub fn close(&mut self) {
        for group in &mut self.groups {
            for writer in &mut group.writers {
                writer.close();
            }
        }
        debug!(producer = %self.producer, "output gate closed");
    }
}

impl<T: Clone> OutputChannelGate<T> {
    /// Route `record` through every group's selector and send it to each
    /// selected channel.
    ///
    /// Routing is resolved for all groups before anything is sent, so a
    /// routing error leaves every channel untouched. Delivery is not
    /// all-or-nothing: a dropped consumer fails the emit, but the record
    /// still reaches every other selected channel.
    pub fn emit(&self, record: StreamRecord<T>) -> Result<(), GateError> {
        let mut targets = Vec::new();
        for (group_index, group) in self.groups.iter().enumerate() {
            let channels = group
                .selector
                .select_channels(&record, group.writers.len())?;
            targets.extend(channels.into_iter().map(|channel| (group_index, channel)));
        }
        self.send_to(&targets, StreamElement::Record(record))
    }

    /// Emit a bare value with no timestamp or partition tag.
    pub fn emit_value(&self, value: T) -> Result<(), GateError> {
        self.emit(StreamRecord::new(value))
    }

    /// Send a watermark to every channel of every group.
    pub fn emit_watermark(&self, timestamp: EventTime) -> Result<(), GateError> {
        let targets: Vec<(usize, usize)> = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(group_index, group)| {
                (0..group.writers.len()).map(move |channel| (group_index, channel))
            })
            .collect();
        self.send_to(
            &targets,
            StreamElement::Watermark(Watermark::new(timestamp)),
        )
    }

    /// Emit a record or forward a watermark.
    pub fn emit_element(&self, element: StreamElement<T>) -> Result<(), GateError> {
        match element {
            StreamElement::Record(record) => self.emit(record),
            StreamElement::Watermark(watermark) => self.emit_watermark(watermark.timestamp),
        }
    }

    fn send_to(
        &self,
        targets: &[(usize, usize)],
        element: StreamElement<T>,
    ) -> Result<(), GateError> {
        let Some((&(last_group, last_channel), rest)) = targets.split_last() else {
            return Ok(());
        };

        // A failed target does not stop delivery to the others; the first
        // error is reported once every target was tried.
        let mut first_error = None;

        // Clone for all but the last target
        for &(group, channel) in rest {
            let sent = self
                .writer(group, channel)
                .and_then(|writer| writer.send(element.clone()));
            if let Err(err) = sent {
                first_error.get_or_insert(err);
            }
        }

        // Move for the last target (no clone needed)
        let last = self
            .writer(last_group, last_channel)
            .and_then(|writer| writer.send(element));
        match first_error {
            Some(err) => Err(err),
            None => last,
        }
    }

    fn writer(&self, group: usize, channel: usize) -> Result<&ChannelWriter<T>, GateError> {
        self.groups
            .get(group)
            .and_then(|g| g.writers.get(channel))
            .ok_or(GateError::ChannelClosed { channel })
    }
}

impl<T> std::fmt::Debug for OutputChannelGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannelGate")
            .field("producer", &self.producer)
            .field("groups", &self.groups)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/output_gate_tests.rs"]
mod tests;
