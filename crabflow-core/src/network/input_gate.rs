//! InputChannelGate for reading from multiple input channels.
//!
//! - Merges all input channels in arrival order
//! - Notifies a registered listener when a channel becomes non-empty
//! - Reports `EndOfStream` once every channel is closed and drained

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};

use crate::error::GateError;
use crate::network::{
    Arrival, ChannelState, ChannelWriter, GateEvent, GateId, GateShared,
};
use crate::runtime::CancellationToken;
use crate::types::StreamElement;

/// Result of reading from an input gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutput<T> {
    Element {
        channel: usize,
        element: StreamElement<T>,
    },
    EndOfStream,
}

/// Reading side of a vertex's input channels.
pub struct InputChannelGate<T> {
    shared: Arc<GateShared<T>>,
    signal: Receiver<()>,
}

impl<T> InputChannelGate<T> {
    /// Create a gate with `num_channels` input channels and their writers.
    pub fn new(gate: GateId, num_channels: usize) -> (Self, Vec<ChannelWriter<T>>) {
        let (shared, signal) = GateShared::new(gate, num_channels);
        let writers = (0..num_channels)
            .map(|channel| ChannelWriter::new(Arc::clone(&shared), channel))
            .collect();
        (Self { shared, signal }, writers)
    }

    pub fn id(&self) -> GateId {
        self.shared.gate
    }

    /// Register the single listener that receives [`GateEvent`]s.
    ///
    /// Notifications are edge-triggered. Channels that already hold data are
    /// announced once on registration.
    pub fn register_listener(&self, listener: Sender<GateEvent>) -> Result<(), GateError> {
        let pending = {
            let mut state = self.shared.lock();
            if state.listener.is_some() {
                return Err(GateError::ListenerAlreadyRegistered);
            }
            state.listener = Some(listener.clone());
            state.channels_with_data()
        };
        for channel in pending {
            let _ = listener.send(GateEvent::ChannelAvailable {
                gate: self.shared.gate,
                channel,
            });
        }
        Ok(())
    }

    /// Take the next buffered element without blocking.
    ///
    /// `Ok(None)` means nothing is buffered yet but some channel is still open.
    pub fn try_next(&self) -> Result<Option<GateOutput<T>>, GateError> {
        let mut state = self.shared.lock();
        if let Some((channel, arrival)) = state.queue.pop_front() {
            state.consumed(channel);
            return match arrival {
                Arrival::Element(element) => Ok(Some(GateOutput::Element { channel, element })),
                Arrival::Failed(reason) => Err(GateError::ChannelRead { channel, reason }),
            };
        }
        if state.all_closed() {
            return Ok(Some(GateOutput::EndOfStream));
        }
        Ok(None)
    }

    /// Block until an element arrives, every channel has ended, or `cancel`
    /// fires.
    pub fn next(&self, cancel: &CancellationToken) -> Result<GateOutput<T>, GateError> {
        loop {
            if cancel.is_cancelled() {
                return Err(GateError::TaskCancelled);
            }
            if let Some(output) = self.try_next()? {
                return Ok(output);
            }
            select! {
                recv(self.signal) -> _ => {}
                recv(cancel.receiver()) -> _ => return Err(GateError::TaskCancelled),
            }
        }
    }

    /// Like [`next`](Self::next) but gives up after `timeout`, returning
    /// `Ok(None)`.
    pub fn next_timeout(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Option<GateOutput<T>>, GateError> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(GateError::TaskCancelled);
            }
            if let Some(output) = self.try_next()? {
                return Ok(Some(output));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            select! {
                recv(self.signal) -> _ => {}
                recv(cancel.receiver()) -> _ => return Err(GateError::TaskCancelled),
                default(remaining) => return Ok(None),
            }
        }
    }

    pub fn channel_state(&self, channel: usize) -> Option<ChannelState> {
        self.shared.lock().state(channel)
    }

    pub fn num_channels(&self) -> usize {
        self.shared.lock().num_channels()
    }

    /// Number of channels whose writer has finished.
    pub fn num_closed(&self) -> usize {
        self.shared.lock().num_closed()
    }

    /// Number of arrivals buffered and not yet read.
    pub fn buffered(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Arrivals of one channel buffered and not yet read.
    pub fn pending(&self, channel: usize) -> usize {
        self.shared.lock().pending(channel)
    }
}

impl<T> Drop for InputChannelGate<T> {
    fn drop(&mut self) {
        self.shared.lock().detach_receiver();
    }
}

#[cfg(test)]
#[path = "tests/input_gate_tests.rs"]
mod tests;
