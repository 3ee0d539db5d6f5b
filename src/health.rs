//! Health & abort controller (§4.6): the one-way bad-state latches
//! (per-CU and global) and the cooperative client-abort protocol.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::ClientId;

/// Acknowledgement state of an in-flight abort request on one CU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventState {
    /// No abort outstanding on this CU.
    None,
    /// Recorded by `abort()`, not yet processed by the worker.
    Pending,
    /// The worker walked its queues and finished cleanly.
    Done,
    /// The worker could not complete the abort cleanly (e.g. hardware
    /// stuck mid-command).
    Bad,
}

/// `(client, state)`: the current-event record each CU pipeline keeps
/// for abort coordination, per §3's data model.
#[derive(Clone, Copy, Debug)]
pub struct AbortEvent {
    pub client: Option<ClientId>,
    pub state: EventState,
}

impl Default for AbortEvent {
    fn default() -> Self {
        AbortEvent { client: None, state: EventState::None }
    }
}

/// A one-way latch: set is permanent until an explicit `clear()`
/// (issued only after a successful reset).
#[derive(Default)]
pub struct BadState(AtomicBool);

impl BadState {
    pub fn new() -> BadState {
        BadState(AtomicBool::new(false))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            log::warn!("bad-state latch set");
        }
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}
