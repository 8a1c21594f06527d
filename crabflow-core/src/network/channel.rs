//! Local channels between an output gate and an input gate.
//!
//! All channels of one input gate share a single arrival queue, so the gate
//! sees records in the order they arrived regardless of which channel carried
//! them, while each channel individually stays FIFO.
//!
//! Writers push under the gate lock and then wake the reader through a
//! bounded(1) signal channel. A pending token is enough: the reader drains the
//! whole queue before it waits again, so no wakeup is lost.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::GateError;
use crate::network::{GateEvent, GateId};
use crate::types::StreamElement;

/// Observable state of one input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Nothing buffered.
    Empty,
    /// At least one element (or transport error) is waiting to be read.
    HasData,
    /// The writer finished. Buffered elements may still be drained.
    Closed,
}

pub(crate) enum Arrival<T> {
    Element(StreamElement<T>),
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
struct ChannelSlot {
    state: ChannelState,
    pending: usize,
}

pub(crate) struct GateState<T> {
    pub(crate) queue: VecDeque<(usize, Arrival<T>)>,
    slots: Vec<ChannelSlot>,
    closed: usize,
    pub(crate) listener: Option<Sender<GateEvent>>,
    receiver_alive: bool,
}

impl<T> GateState<T> {
    pub(crate) fn state(&self, channel: usize) -> Option<ChannelState> {
        self.slots.get(channel).map(|slot| slot.state)
    }

    pub(crate) fn num_channels(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn num_closed(&self) -> usize {
        self.closed
    }

    pub(crate) fn all_closed(&self) -> bool {
        self.closed == self.slots.len()
    }

    /// Arrivals of `channel` buffered and not yet read.
    pub(crate) fn pending(&self, channel: usize) -> usize {
        self.slots.get(channel).map_or(0, |slot| slot.pending)
    }

    /// Channels currently holding data, for announcing to a late listener.
    pub(crate) fn channels_with_data(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == ChannelState::HasData)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Bookkeeping after the reader took one arrival of `channel`.
    pub(crate) fn consumed(&mut self, channel: usize) {
        let slot = &mut self.slots[channel];
        slot.pending -= 1;
        if slot.pending == 0 && slot.state == ChannelState::HasData {
            slot.state = ChannelState::Empty;
        }
    }

    pub(crate) fn detach_receiver(&mut self) {
        self.receiver_alive = false;
        self.queue.clear();
    }
}

/// State shared between an input gate and the writers feeding it.
pub(crate) struct GateShared<T> {
    pub(crate) gate: GateId,
    state: Mutex<GateState<T>>,
    signal_tx: Sender<()>,
}

impl<T> GateShared<T> {
    pub(crate) fn new(gate: GateId, num_channels: usize) -> (Arc<Self>, Receiver<()>) {
        let (signal_tx, signal_rx) = bounded(1);
        let shared = Arc::new(Self {
            gate,
            state: Mutex::new(GateState {
                queue: VecDeque::new(),
                slots: vec![
                    ChannelSlot {
                        state: ChannelState::Empty,
                        pending: 0,
                    };
                    num_channels
                ],
                closed: 0,
                listener: None,
                receiver_alive: true,
            }),
            signal_tx,
        });
        (shared, signal_rx)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        // Every critical section leaves the state consistent, so a panic in
        // another holder does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        let _ = self.signal_tx.try_send(());
    }

    fn notify(&self, listener: Option<Sender<GateEvent>>, event: GateEvent) {
        if let Some(listener) = listener {
            if listener.send(event).is_err() {
                debug!(gate = %self.gate, "gate listener dropped; notification discarded");
            }
        }
    }

    fn push(&self, channel: usize, arrival: Arrival<T>) -> Result<(), GateError> {
        let (listener, became_available) = {
            let mut state = self.lock();
            if !state.receiver_alive {
                return Err(GateError::ReceiverDropped { channel });
            }
            let slot = &mut state.slots[channel];
            let became_available = match slot.state {
                ChannelState::Closed => return Err(GateError::ChannelClosed { channel }),
                ChannelState::Empty => {
                    slot.state = ChannelState::HasData;
                    true
                }
                ChannelState::HasData => false,
            };
            slot.pending += 1;
            state.queue.push_back((channel, arrival));
            (state.listener.clone(), became_available)
        };

        self.wake();
        if became_available {
            self.notify(
                listener,
                GateEvent::ChannelAvailable {
                    gate: self.gate,
                    channel,
                },
            );
        }
        Ok(())
    }

    fn close(&self, channel: usize) {
        let listener = {
            let mut state = self.lock();
            let slot = &mut state.slots[channel];
            if slot.state == ChannelState::Closed {
                return;
            }
            slot.state = ChannelState::Closed;
            state.closed += 1;
            state.listener.clone()
        };

        debug!(gate = %self.gate, channel, "input channel closed");
        // Listener hears about the close before the reader can observe end of stream.
        self.notify(
            listener,
            GateEvent::ChannelClosed {
                gate: self.gate,
                channel,
            },
        );
        self.wake();
    }
}

/// Writing end of one channel into an input gate.
pub struct ChannelWriter<T> {
    shared: Arc<GateShared<T>>,
    channel: usize,
    closed: bool,
}

impl<T> ChannelWriter<T> {
    pub(crate) fn new(shared: Arc<GateShared<T>>, channel: usize) -> Self {
        Self {
            shared,
            channel,
            closed: false,
        }
    }

    /// Index of this channel inside the receiving gate.
    pub fn channel_index(&self) -> usize {
        self.channel
    }

    /// The gate this channel feeds.
    pub fn gate(&self) -> GateId {
        self.shared.gate
    }

    /// Append an element to the channel.
    pub fn send(&self, element: StreamElement<T>) -> Result<(), GateError> {
        self.shared.push(self.channel, Arrival::Element(element))
    }

    /// Report a transport failure. The reader sees it as
    /// [`GateError::ChannelRead`] in arrival order; sibling channels are
    /// unaffected.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), GateError> {
        self.shared.push(self.channel, Arrival::Failed(reason.into()))
    }

    /// Mark the channel finished. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
        self.shared.close(self.channel);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T> Drop for ChannelWriter<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(
            gate = %self.shared.gate,
            channel = self.channel,
            "channel writer dropped without closing"
        );
        let _ = self
            .shared
            .push(self.channel, Arrival::Failed("writer dropped".to_string()));
        self.shared.close(self.channel);
    }
}

impl<T> std::fmt::Debug for ChannelWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("gate", &self.shared.gate)
            .field("channel", &self.channel)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
