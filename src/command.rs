//! Command object and completion notify (§4.5): the container that
//! carries a payload from submission through to a terminal state, and
//! the notify path a worker invokes exactly once per command.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::context::{ClientId, ClientWaiter};
use crate::cu::ConfigMode;

/// Opcode recognized in a command buffer header. `Configure` carries a
/// scheduler configuration packet; `StartCu` launches a single CU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Configure,
    StartCu,
}

/// `new -> queued(pending) -> queued(running) -> in_flight(submitted)
/// -> {completed | error | timeout | abort}`. Terminal states are
/// absorbing; `New` and `Queued` are pre-terminal and never observed
/// through the completion path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandState {
    New = 0,
    Queued = 1,
    Running = 2,
    Completed = 3,
    Error = 4,
    Timeout = 5,
    Abort = 6,
}

impl CommandState {
    fn from_u8(v: u8) -> CommandState {
        match v {
            0 => CommandState::New,
            1 => CommandState::Queued,
            2 => CommandState::Running,
            3 => CommandState::Completed,
            4 => CommandState::Error,
            5 => CommandState::Timeout,
            _ => CommandState::Abort,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandState::Completed | CommandState::Error | CommandState::Timeout | CommandState::Abort
        )
    }
}

/// The "external status word" a command buffer's `state` field maps
/// to; mutated only by the notify path, readable at any time by the
/// submitter.
#[derive(Default)]
pub struct StatusWord(AtomicU8);

impl StatusWord {
    pub fn new() -> StatusWord {
        StatusWord(AtomicU8::new(CommandState::New as u8))
    }

    pub fn get(&self) -> CommandState {
        CommandState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: CommandState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// The optional in-kernel completion hook attached by `EXECBUF_CB`.
pub type InKernelCallback = Box<dyn FnOnce(CommandState) + Send>;

pub struct Command {
    pub seq_id: u64,
    pub client: ClientId,
    pub opcode: Opcode,
    /// Destination CU index. Multi-CU fan-out (§3's "CU-mask") is left
    /// to the ERT path in this core; see `DESIGN.md`.
    pub target_cu: u32,
    pub payload: Vec<u8>,
    pub config_mode: ConfigMode,
    pub status: Arc<StatusWord>,
    waiter: Arc<ClientWaiter>,
    inkern_cb: Option<InKernelCallback>,
    pub(crate) enqueued_at: Instant,
    /// Set by abort handling on a command already in the submitted
    /// queue (hardware has it; it cannot be pulled back). If the
    /// command still completes naturally its terminal state becomes
    /// `Abort` instead of `Completed`.
    pub(crate) abort_requested: bool,
}

impl Command {
    pub fn new(
        seq_id: u64,
        client: ClientId,
        opcode: Opcode,
        target_cu: u32,
        payload: Vec<u8>,
        config_mode: ConfigMode,
        waiter: Arc<ClientWaiter>,
        inkern_cb: Option<InKernelCallback>,
    ) -> Command {
        Command {
            seq_id,
            client,
            opcode,
            target_cu,
            payload,
            config_mode,
            status: Arc::new(StatusWord::new()),
            waiter,
            inkern_cb,
            enqueued_at: Instant::now(),
            abort_requested: false,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client
    }

    /// Invoked by the owning CU pipeline's worker exactly once, when
    /// `state` becomes terminal. Writes the status word, releases the
    /// payload (by dropping it), and either runs the deferred
    /// in-kernel hook (off the worker thread, mirroring the original
    /// driver's `schedule_work`) or wakes the client's poll() waiter.
    pub fn complete(mut self, state: CommandState) {
        debug_assert!(state.is_terminal());
        self.status.set(state);
        self.payload.clear();
        self.payload.shrink_to_fit();

        if let Some(cb) = self.inkern_cb.take() {
            std::thread::spawn(move || cb(state));
        } else {
            self.waiter.wake();
        }
    }
}
