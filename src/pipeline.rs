//! The CU pipeline (§4.1): the four-stage queue machine — pending,
//! running, submitted, completed — driven by one dedicated worker
//! thread per CU, plus the credit and completion accounting that
//! enforces the CU's hardware contract.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::command::{Command, CommandState};
use crate::context::ClientId;
use crate::cu::CuDriver;
use crate::error::{Error, Result};
use crate::health::{AbortEvent, BadState, EventState};

/// How often the worker wakes on its own when no producer or
/// interrupt has signaled it — the "polling period" fallback named in
/// §5 for when interrupts are disabled.
const SELF_WAKE_PERIOD: Duration = Duration::from_millis(2);
const RESET_POLL_ATTEMPTS: u32 = 500;
const RESET_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub max_credits: u32,
    /// Zero disables timeout enforcement.
    pub run_timeout: Duration,
    /// Short-circuits every launch to an instant completion (`kds_echo`).
    pub echo: bool,
}

struct SubmittedCmd {
    cmd: Command,
    started_at: Instant,
}

/// State shared between producer threads and the worker. Only the
/// pending queue is touched by producers; everything else here is
/// diagnostics the worker publishes for the readiness probe, or the
/// abort/reset signaling slots. The worker's other three queues live
/// entirely on the worker thread's stack (see `run_worker`) and need
/// no synchronization at all.
struct Shared {
    index: u32,
    pending: Mutex<VecDeque<Command>>,
    // Producer-modified counter; kept separate from the worker-modified
    // counters below so the two groups don't share a cache line under
    // contention (§5's false-sharing note).
    pending_len: AtomicUsize,
    running_len: AtomicUsize,
    submitted_len: AtomicUsize,
    completed_len: AtomicUsize,
    credits_in_use: AtomicUsize,
    done_total: AtomicU64,
    ready_total: AtomicU64,
    bad_state: BadState,
    event: Mutex<AbortEvent>,
    wake_tx: Sender<()>,
    reset_tx: Sender<Sender<bool>>,
}

pub struct CuPipeline {
    pub descriptor: crate::cu::CuDescriptor,
    config: PipelineConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CuPipeline {
    pub fn new(
        descriptor: crate::cu::CuDescriptor,
        mut driver: Box<dyn CuDriver>,
        config: PipelineConfig,
    ) -> CuPipeline {
        let (wake_tx, wake_rx) = bounded::<()>(1);
        let (reset_tx, reset_rx) = bounded::<Sender<bool>>(1);
        let shared = Arc::new(Shared {
            index: descriptor.logical_index,
            pending: Mutex::new(VecDeque::new()),
            pending_len: AtomicUsize::new(0),
            running_len: AtomicUsize::new(0),
            submitted_len: AtomicUsize::new(0),
            completed_len: AtomicUsize::new(0),
            credits_in_use: AtomicUsize::new(0),
            done_total: AtomicU64::new(0),
            ready_total: AtomicU64::new(0),
            bad_state: BadState::new(),
            event: Mutex::new(AbortEvent::default()),
            wake_tx,
            reset_tx,
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("kds-cu-{}", descriptor.logical_index))
            .spawn(move || run_worker(worker_shared, driver.as_mut(), wake_rx, reset_rx, config))
            .expect("failed to spawn CU worker thread");

        CuPipeline { descriptor, config, shared, handle: Mutex::new(Some(handle)) }
    }

    /// Append to the pending queue and wake the worker. Non-blocking.
    pub fn submit(&self, cmd: Command) -> Result<()> {
        if self.shared.bad_state.is_set() {
            return Err(Error::BadState);
        }
        {
            let mut pending = self.shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.push_back(cmd);
        }
        self.shared.pending_len.fetch_add(1, Ordering::Relaxed);
        let _ = self.shared.wake_tx.try_send(());
        Ok(())
    }

    /// Records `(client, pending)` in the event slot and wakes the
    /// worker, which marks every command it owns on this CU as
    /// `abort` on its next wake.
    pub fn abort(&self, client: ClientId) {
        {
            let mut ev = self.shared.event.lock().unwrap_or_else(|e| e.into_inner());
            *ev = AbortEvent { client: Some(client), state: EventState::Pending };
        }
        let _ = self.shared.wake_tx.try_send(());
    }

    /// True once the worker has acknowledged the most recent abort
    /// request for `client` (`Done` or `Bad`).
    pub fn abort_done(&self, client: ClientId) -> bool {
        let ev = self.shared.event.lock().unwrap_or_else(|e| e.into_inner());
        match ev.client {
            Some(c) if c == client => matches!(ev.state, EventState::Done | EventState::Bad),
            _ => true,
        }
    }

    /// The raw abort-event state for `client`, distinguishing a clean
    /// `Done` acknowledgement from a `Bad` one. Exposed only so tests
    /// can assert on the distinction; ordinary callers only need
    /// `abort_done`.
    #[cfg(test)]
    pub(crate) fn abort_event_state(&self, client: ClientId) -> Option<EventState> {
        let ev = self.shared.event.lock().unwrap_or_else(|e| e.into_inner());
        (ev.client == Some(client)).then_some(ev.state)
    }

    /// Issues a reset and blocks until the worker has processed it.
    /// Clears the bad-state latch iff the CU driver reports
    /// `reset_done`.
    pub fn reset(&self) -> bool {
        let (reply_tx, reply_rx) = bounded::<bool>(0);
        if self.shared.reset_tx.send(reply_tx).is_err() {
            return false;
        }
        let _ = self.shared.wake_tx.try_send(());
        reply_rx.recv().unwrap_or(false)
    }

    pub fn bad_state(&self) -> bool {
        self.shared.bad_state.is_set()
    }

    pub fn set_bad_state(&self) {
        self.shared.bad_state.set();
    }

    /// Snapshot for the sysfs-equivalent readiness probe.
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            index: self.shared.index,
            pending: self.shared.pending_len.load(Ordering::Relaxed),
            running: self.shared.running_len.load(Ordering::Relaxed),
            submitted: self.shared.submitted_len.load(Ordering::Relaxed),
            completed: self.shared.completed_len.load(Ordering::Relaxed),
            credits_in_use: self.shared.credits_in_use.load(Ordering::Relaxed),
            credits_max: self.config.max_credits,
            done_total: self.shared.done_total.load(Ordering::Relaxed),
            ready_total: self.shared.ready_total.load(Ordering::Relaxed),
            bad_state: self.shared.bad_state.is_set(),
        }
    }
}

impl Drop for CuPipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            // The worker loop has no shutdown signal of its own since
            // a CU pipeline lives for the lifetime of the scheduler;
            // detach rather than block teardown on it.
            drop(handle);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineSnapshot {
    pub index: u32,
    pub pending: usize,
    pub running: usize,
    pub submitted: usize,
    pub completed: usize,
    pub credits_in_use: usize,
    pub credits_max: u32,
    pub done_total: u64,
    pub ready_total: u64,
    pub bad_state: bool,
}

fn run_worker(
    shared: Arc<Shared>,
    driver: &mut dyn CuDriver,
    wake_rx: Receiver<()>,
    reset_rx: Receiver<Sender<bool>>,
    config: PipelineConfig,
) {
    let mut running: VecDeque<Command> = VecDeque::new();
    let mut submitted: VecDeque<SubmittedCmd> = VecDeque::new();
    let mut completed: VecDeque<Command> = VecDeque::new();
    let mut done_count: u32 = 0;
    let mut ready_count: u32 = 0;

    loop {
        let _ = wake_rx.recv_timeout(SELF_WAKE_PERIOD);

        if let Ok(reply) = reset_rx.try_recv() {
            let ok = do_reset(&shared, driver, &mut running, &mut submitted, &mut completed);
            shared.running_len.store(0, Ordering::Relaxed);
            shared.submitted_len.store(0, Ordering::Relaxed);
            shared.completed_len.store(0, Ordering::Relaxed);
            shared.credits_in_use.store(0, Ordering::Relaxed);
            done_count = 0;
            ready_count = 0;
            let _ = reply.send(ok);
            continue;
        }

        // 1. Move pending -> running, bounding producer contention to
        // this one short critical section.
        {
            let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            while let Some(cmd) = pending.pop_front() {
                running.push_back(cmd);
            }
            shared.pending_len.store(0, Ordering::Relaxed);
        }

        // Abort scan: by this point every command this worker owns for
        // this wake is in `running` or `submitted`. Pending-queue and
        // running-queue residents can be pulled and failed outright;
        // submitted commands are already on the hardware and are only
        // flagged, resolved below by step 3 or step 5.
        scan_abort(&shared, &mut running, &mut submitted);

        // 2. Launch ready commands while the CU has a free credit.
        while let Some(_head) = running.front() {
            if shared.bad_state.is_set() {
                break;
            }
            if driver.peek_credit() <= 0 {
                break;
            }
            let remaining = driver.alloc_credit();
            if remaining < 0 {
                break;
            }
            if config.echo {
                // Open question (design notes): `echo` is treated as an
                // instant-complete backend, so credit is still acquired
                // and released symmetrically rather than skipped.
                let mut cmd = running.pop_front().unwrap();
                driver.free_credit(1);
                if cmd.abort_requested {
                    cmd.complete(CommandState::Abort);
                } else {
                    cmd.complete(CommandState::Completed);
                }
                continue;
            }
            let mut cmd = running.pop_front().unwrap();
            driver.configure(&cmd.payload, cmd.config_mode);
            driver.start();
            cmd.payload.clear();
            submitted.push_back(SubmittedCmd { cmd, started_at: Instant::now() });
            shared.credits_in_use.fetch_add(1, Ordering::Relaxed);
        }
        shared.running_len.store(running.len(), Ordering::Relaxed);
        shared.submitted_len.store(submitted.len(), Ordering::Relaxed);

        // 3. Poll completion.
        if !config.echo {
            let status = driver.check();
            done_count += status.num_done;
            ready_count += status.num_ready;
            shared.done_total.fetch_add(status.num_done as u64, Ordering::Relaxed);
            shared.ready_total.fetch_add(status.num_ready as u64, Ordering::Relaxed);

            // Open question in the design notes: don't trust the CU to
            // never over-report. Clamp and log instead of underflowing.
            let drain_n = done_count.min(submitted.len() as u32);
            if drain_n < done_count {
                log::warn!(
                    "CU {} reported {} done but only {} commands in flight; clamping",
                    shared.index,
                    done_count,
                    submitted.len()
                );
            }
            for _ in 0..drain_n {
                let SubmittedCmd { cmd, .. } = submitted.pop_front().unwrap();
                driver.free_credit(1);
                shared.credits_in_use.fetch_sub(1, Ordering::Relaxed);
                completed.push_back(cmd);
            }
            done_count -= drain_n;
            // `ready_count` signals the CU may accept another start
            // even before `done` arrives (chained protocols); this
            // core does not implement speculative chained starts, so
            // it is only surfaced through the readiness probe.
            ready_count = 0;
        }

        // 4. Drain completed -> notify exactly once each.
        while let Some(cmd) = completed.pop_front() {
            let state = if cmd.abort_requested { CommandState::Abort } else { CommandState::Completed };
            cmd.complete(state);
        }
        shared.completed_len.store(0, Ordering::Relaxed);
        shared.submitted_len.store(submitted.len(), Ordering::Relaxed);

        // 5. Timeout enforcement.
        if !config.echo && !config.run_timeout.is_zero() {
            if let Some(head) = submitted.front() {
                if head.started_at.elapsed() > config.run_timeout {
                    shared.bad_state.set();
                    let head = submitted.pop_front().unwrap();
                    // The head's credit is not returned to the driver: the CU
                    // is stuck and we don't know it's actually free until a
                    // reset confirms it. `credits_in_use` still drops so it
                    // keeps tracking `|submitted|`, per the accounting
                    // invariant; the driver-side credit count is reconciled
                    // by `reset()`, the only path out of bad state.
                    shared.credits_in_use.fetch_sub(1, Ordering::Relaxed);
                    log::warn!("CU {} command {} timed out", shared.index, head.cmd.seq_id);
                    head.cmd.complete(CommandState::Timeout);
                    // The rest of the submitted queue is behind a CU that
                    // just proved it can stall; none of their credits are
                    // trusted either, so they're reconciled by `reset()`
                    // the same way, not returned here.
                    while let Some(s) = submitted.pop_front() {
                        shared.credits_in_use.fetch_sub(1, Ordering::Relaxed);
                        s.cmd.complete(CommandState::Error);
                    }
                    shared.submitted_len.store(0, Ordering::Relaxed);
                }
            }
        }

        // Bad state (from this wake's timeout, or latched externally
        // via `set_bad_state`) drains whatever is left in `running` —
        // no new command may enter `running`'s successor, `submitted`.
        if shared.bad_state.is_set() {
            while let Some(cmd) = running.pop_front() {
                cmd.complete(CommandState::Error);
            }
            shared.running_len.store(0, Ordering::Relaxed);
        }
    }
}

fn scan_abort(shared: &Shared, running: &mut VecDeque<Command>, submitted: &mut VecDeque<SubmittedCmd>) {
    let target = {
        let ev = shared.event.lock().unwrap_or_else(|e| e.into_inner());
        if ev.state != EventState::Pending {
            return;
        }
        ev.client
    };
    let Some(target) = target else { return };

    let mut remaining = VecDeque::with_capacity(running.len());
    while let Some(cmd) = running.pop_front() {
        if cmd.client_id() == target {
            cmd.complete(CommandState::Abort);
        } else {
            remaining.push_back(cmd);
        }
    }
    *running = remaining;

    for s in submitted.iter_mut() {
        if s.cmd.client_id() == target {
            s.cmd.abort_requested = true;
        }
    }

    // A CU already latched bad can't be trusted to ever resolve a
    // submitted command it's still holding (no timeout may be
    // configured to force it out, and only `reset()` clears the
    // latch), so an abort that leaves any such command outstanding
    // is acknowledged `Bad` rather than `Done` per §4.6.
    let bad = shared.bad_state.is_set()
        && submitted.iter().any(|s| s.cmd.client_id() == target);
    let mut ev = shared.event.lock().unwrap_or_else(|e| e.into_inner());
    ev.state = if bad { EventState::Bad } else { EventState::Done };
}

fn do_reset(
    shared: &Shared,
    driver: &mut dyn CuDriver,
    running: &mut VecDeque<Command>,
    submitted: &mut VecDeque<SubmittedCmd>,
    completed: &mut VecDeque<Command>,
) -> bool {
    driver.reset();
    let mut done = false;
    for _ in 0..RESET_POLL_ATTEMPTS {
        if driver.reset_done() {
            done = true;
            break;
        }
        thread::sleep(RESET_POLL_INTERVAL);
    }

    if done {
        shared.bad_state.clear();
        log::info!("CU {} reset completed", shared.index);
    } else {
        shared.bad_state.set();
        log::warn!("CU {} reset did not complete", shared.index);
    }

    // A reset invalidates anything hardware was holding; nothing
    // in-flight survives it.
    while let Some(cmd) = completed.pop_front() {
        cmd.complete(CommandState::Error);
    }
    while let Some(s) = submitted.pop_front() {
        s.cmd.complete(CommandState::Error);
    }
    while let Some(cmd) = running.pop_front() {
        cmd.complete(CommandState::Error);
    }
    done
}
