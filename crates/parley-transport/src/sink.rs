//! Liveness-checked event posting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// The sending half of an owner's queue, paired with a liveness flag.
///
/// Workers post results back through a sink. Once the owning component is
/// stopped the flag is cleared and every later `post` is a no-op, so no
/// callback fires after `stop()` returns.
pub struct EventSink<E> {
    tx: mpsc::UnboundedSender<E>,
    alive: Arc<AtomicBool>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl<E> EventSink<E> {
    /// Creates a live sink and the receiver the owner drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, Arc::new(AtomicBool::new(true))), rx)
    }

    pub fn new(tx: mpsc::UnboundedSender<E>, alive: Arc<AtomicBool>) -> Self {
        Self { tx, alive }
    }

    /// A sink posting into the same queue with its own liveness flag.
    pub fn fork(&self) -> Self {
        Self::new(self.tx.clone(), Arc::new(AtomicBool::new(true)))
    }

    /// Posts `event` unless the sink was killed or the owner went away.
    /// Returns whether the event was delivered.
    pub fn post(&self, event: E) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Stops delivery from this sink and every clone of it.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// The shared liveness flag.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }
}
