//! # Iteration broker
//!
//! Keyed rendezvous used by two cooperating tasks of one superstep to pass a
//! shared object (typically a built hash table) without going through the
//! channel transport.
//!
//! Every key owns a bounded(1) slot created by whichever side arrives first.
//! `hand_in` fills it, `get_and_remove` waits on it outside the table lock and
//! tears it down once claimed. Each slot also owns a cancel sender; dropping it
//! wakes every waiter of that key at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::runtime::CancellationToken;

/// Unique key for one handoff: job, iteration, superstep and consuming subtask.
pub fn broker_key(job: &str, iteration: u32, subtask: usize, superstep: u64) -> String {
    format!("{}step-{superstep}/task-{subtask}", iteration_prefix(job, iteration))
}

/// Prefix shared by every key of one iteration, for [`IterationBroker::cleanup`].
pub fn iteration_prefix(job: &str, iteration: u32) -> String {
    format!("{job}/iter-{iteration}/")
}

struct Slot<V> {
    generation: u64,
    tx: Sender<V>,
    rx: Receiver<V>,
    // Never sends; dropped to wake waiters.
    _cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    waiters: usize,
}

impl<V> Slot<V> {
    fn new(generation: u64) -> Self {
        let (tx, rx) = bounded(1);
        let (cancel_tx, cancel_rx) = bounded(0);
        Self {
            generation,
            tx,
            rx,
            _cancel_tx: cancel_tx,
            cancel_rx,
            waiters: 0,
        }
    }
}

struct Table<V> {
    slots: HashMap<String, Slot<V>>,
    next_generation: u64,
}

impl<V> Table<V> {
    fn slot(&mut self, key: &str) -> &mut Slot<V> {
        let next_generation = &mut self.next_generation;
        self.slots.entry(key.to_string()).or_insert_with(|| {
            let generation = *next_generation;
            *next_generation += 1;
            Slot::new(generation)
        })
    }

    /// Drop a waiter's claim on `key`, removing the slot when nothing is left
    /// in it.
    fn release(&mut self, key: &str, generation: u64) {
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        slot.waiters -= 1;
        if slot.waiters == 0 && slot.rx.is_empty() {
            self.slots.remove(key);
        }
    }

    /// Remove `key`, discarding any unclaimed value and waking its waiters.
    fn discard(&mut self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                // Buffered values outlive disconnection, so drain before drop.
                while slot.rx.try_recv().is_ok() {}
                true
            }
            None => false,
        }
    }
}

/// Per-job rendezvous table for superstep handoffs.
///
/// Constructed explicitly and shared through `Arc` with every task of one job.
pub struct IterationBroker<V> {
    table: Mutex<Table<V>>,
    shut_down: AtomicBool,
}

impl<V> IterationBroker<V> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                next_generation: 0,
            }),
            shut_down: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancelled(key: &str) -> BrokerError {
        BrokerError::BrokerCancelled {
            key: key.to_string(),
        }
    }

    /// Store `value` under `key`.
    ///
    /// Fails with [`BrokerError::DuplicateHandoff`] while an earlier value for
    /// the same key is still unclaimed.
    pub fn hand_in(&self, key: &str, value: V) -> Result<(), BrokerError> {
        let mut table = self.lock();
        // Checked under the lock so a concurrent shutdown cannot miss the slot.
        if self.is_shut_down() {
            return Err(Self::cancelled(key));
        }
        let slot = table.slot(key);
        if slot.tx.is_full() {
            return Err(BrokerError::DuplicateHandoff {
                key: key.to_string(),
            });
        }
        slot.tx
            .try_send(value)
            .map_err(|_| BrokerError::DuplicateHandoff {
                key: key.to_string(),
            })?;
        debug!(key, waiters = slot.waiters, "value handed in");
        Ok(())
    }

    /// Block until a value is handed in under `key`, then remove and return it.
    ///
    /// Returns [`BrokerError::BrokerCancelled`] when the key is discarded by
    /// [`cleanup`](Self::cleanup), [`cancel_key`](Self::cancel_key) or
    /// [`shutdown`](Self::shutdown).
    pub fn get_and_remove(&self, key: &str) -> Result<V, BrokerError> {
        self.wait(key, None, None)
    }

    /// Like [`get_and_remove`](Self::get_and_remove), but also returns
    /// `BrokerCancelled` as soon as `cancel` fires.
    pub fn get_and_remove_cancellable(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<V, BrokerError> {
        self.wait(key, Some(cancel), None)
    }

    /// Bounded wait. On expiry the key is cancelled, waking any other waiter
    /// on it, and `BrokerCancelled` is returned.
    pub fn get_and_remove_timeout(&self, key: &str, timeout: Duration) -> Result<V, BrokerError> {
        self.wait(key, None, Some(timeout))
    }

    /// Bounded wait that also ends as soon as `cancel` fires. Only expiry
    /// cancels the key.
    pub fn get_and_remove_cancellable_timeout(
        &self,
        key: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<V, BrokerError> {
        self.wait(key, Some(cancel), Some(timeout))
    }

    fn wait(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> Result<V, BrokerError> {
        let (generation, rx, slot_cancel) = {
            let mut table = self.lock();
            if self.is_shut_down() {
                return Err(Self::cancelled(key));
            }
            let slot = table.slot(key);
            slot.waiters += 1;
            (slot.generation, slot.rx.clone(), slot.cancel_rx.clone())
        };
        let task_cancel = cancel.map_or_else(never, |token| token.receiver().clone());
        let deadline = timeout.map_or_else(never, after);

        let mut expired = false;
        let result = select! {
            recv(rx) -> msg => msg.map_err(|_| Self::cancelled(key)),
            recv(slot_cancel) -> _ => Err(Self::cancelled(key)),
            recv(task_cancel) -> _ => Err(Self::cancelled(key)),
            recv(deadline) -> _ => {
                expired = true;
                Err(Self::cancelled(key))
            }
        };

        let mut table = self.lock();
        table.release(key, generation);
        if expired {
            warn!(key, ?timeout, "broker wait expired; cancelling key");
            if table
                .slots
                .get(key)
                .is_some_and(|slot| slot.generation == generation)
            {
                table.discard(key);
            }
        } else if result.is_ok() {
            debug!(key, "value claimed");
        }
        result
    }

    /// Discard every entry whose key starts with `prefix` and wake the tasks
    /// blocked on them with `BrokerCancelled`. Returns the number of entries
    /// removed.
    pub fn cleanup(&self, prefix: &str) -> usize {
        let mut table = self.lock();
        let keys: Vec<String> = table
            .slots
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            table.discard(key);
        }
        if !keys.is_empty() {
            warn!(prefix, removed = keys.len(), "broker entries cleaned up");
        }
        keys.len()
    }

    /// Discard exactly `key`. Returns whether it existed.
    pub fn cancel_key(&self, key: &str) -> bool {
        let removed = self.lock().discard(key);
        if removed {
            warn!(key, "broker key cancelled");
        }
        removed
    }

    /// Cancel everything and refuse further handoffs. Used when the job is
    /// cancelled.
    pub fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::SeqCst);
        self.cleanup("")
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Whether `key` currently holds an unclaimed value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .slots
            .get(key)
            .is_some_and(|slot| !slot.rx.is_empty())
    }

    /// Number of live slots, including those only holding waiters.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Send> Default for IterationBroker<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;
