//! Token Handoffs
//!
//! Both directions of token traffic are rendezvous style: a transfer only
//! completes while the other side is actually waiting for it.
//!
//! - Refill (scheduler -> manager): the manager parks a one-shot listener in
//!   a [`RefillSlot`]; a scheduler's delivery is non-blocking and fails when
//!   no listener is parked.
//! - Dispense (manager -> caller): each blocked caller registers a
//!   [`Waiter`]; handing a token to a waiter that has since been cancelled
//!   fails and leaves the token with the manager.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// One unit of admission
#[derive(Debug)]
pub(crate) struct Token;

/// A blocked caller's end of the dispense handoff
pub(crate) type Waiter = oneshot::Sender<Token>;

/// Hand a token to a waiting caller
///
/// Returns `false` when the caller stopped waiting; the token stays with the
/// manager in that case.
pub(crate) fn dispense(waiter: Waiter) -> bool {
    waiter.send(Token).is_ok()
}

/// Parking spot for the manager's refill listener
#[derive(Debug, Default)]
pub(crate) struct RefillSlot {
    listener: Mutex<Option<oneshot::Sender<Token>>>,
}

impl RefillSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a listener, returning the receiving end
    ///
    /// Only the manager listens, so at most one listener is ever parked.
    pub(crate) fn listen(&self) -> oneshot::Receiver<Token> {
        let (tx, rx) = oneshot::channel();
        *self.lock() = Some(tx);
        rx
    }

    /// Try to hand one token to a parked listener without waiting
    pub(crate) fn try_deliver(&self) -> bool {
        match self.lock().take() {
            Some(listener) => listener.send(Token).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<oneshot::Sender<Token>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
