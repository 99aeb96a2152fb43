//! Producer-thread plumbing: a one-slot "latest value wins" hand-off and a
//! bounded join for worker threads that may be stuck in a blocking call.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

/// Producer side of a one-slot channel. An offer that finds the slot occupied
/// evicts the undelivered value first, so the consumer only ever sees the
/// newest one and the producer never blocks.
#[derive(Clone)]
pub(crate) struct LatestSlot<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
}

impl<T> LatestSlot<T> {
    /// Slot plus the receiver the consumer pulls from.
    pub(crate) fn new() -> (Self, Receiver<T>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let slot = Self {
            tx,
            evict: rx.clone(),
        };
        (slot, rx)
    }

    pub(crate) fn offer(&self, value: T) {
        if let Err(TrySendError::Full(value)) = self.tx.try_send(value) {
            if self.evict.try_recv().is_ok() {
                log::trace!("LatestSlot: dropped an undelivered value");
            }
            // Single producer: after the eviction the slot has room.
            let _ = self.tx.try_send(value);
        }
    }
}

/// Worker thread whose exit can be awaited with a deadline.
pub(crate) struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the thread's closure returns or unwinds.
    done: Receiver<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                body();
            })?;
        Ok(Self { handle, done })
    }

    /// Join if the thread exits within `grace`. Otherwise the thread is
    /// detached and `false` is returned.
    pub(crate) fn join_within(self, grace: Duration) -> bool {
        match self.done.recv_timeout(grace) {
            Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::warn!("worker thread panicked");
                }
                true
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => false,
        }
    }
}
