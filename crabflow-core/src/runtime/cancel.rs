//! Cooperative cancellation for tasks.
//!
//! A [`CancellationToken`] owns the only sender of a zero-capacity channel.
//! Cancelling drops that sender, so every clone's receiver disconnects at
//! once. Blocking code selects on [`CancellationToken::receiver`] next to its
//! real work and wakes immediately, with no polling interval.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Cloneable handle that signals cancellation to every clone.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Receiver that becomes ready (disconnected) on cancellation.
    ///
    /// Nothing is ever sent on it, so a successful `recv` never happens.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_blocked_receiver() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            assert!(waiter.receiver().recv().is_err());
            start.elapsed()
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let waited = handle.join().unwrap();
        assert!(waited < Duration::from_secs(5));
    }
}
