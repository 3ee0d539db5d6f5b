//! Scheduler dispatch (§4.4): routes an incoming command to the right
//! CU pipeline (or the shared ERT path), maintains the global
//! bad-state flag, and exposes the live-client diagnostic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use std::sync::Arc;

use crate::command::{Command, InKernelCallback, Opcode, StatusWord};
use crate::config::{KdsConfig, MAX_CUS};
use crate::context::{ClientId, ContextRegistry};
use crate::cu::ConfigMode;
use crate::error::{Error, Result};
use crate::health::BadState;
use crate::pipeline::CuPipeline;

/// The embedded-scheduler sibling path. Out of scope here beyond its
/// interface — see spec.md §1 — so this core only needs something it
/// can route to and broadcast resets to.
pub trait ErtPath: Send + Sync {
    fn submit(&self, cmd: Command) -> Result<()>;
    fn reset(&self) -> bool;
}

/// Handle returned from `add_command`: the sequence id plus a shared
/// read of the command's external status word, so a caller that isn't
/// using `EXECBUF_CB` can still observe the terminal state directly
/// instead of only through `Client::waiter`.
pub struct Submission {
    pub seq_id: u64,
    pub status: Arc<StatusWord>,
}

pub struct SchedulerDispatch {
    config: KdsConfig,
    pipelines: Vec<CuPipeline>,
    ert: Option<Box<dyn ErtPath>>,
    registry: ContextRegistry,
    global_bad_state: BadState,
    next_seq: AtomicU64,
    // Guards ordering of `reset()` against concurrent `add_command`
    // calls checking `global_bad_state`; resets are rare so a coarse
    // lock here costs nothing on the hot path.
    reset_lock: Mutex<()>,
}

impl SchedulerDispatch {
    pub fn new(config: KdsConfig, pipelines: Vec<CuPipeline>, ert: Option<Box<dyn ErtPath>>) -> SchedulerDispatch {
        assert!(pipelines.len() <= MAX_CUS, "too many CUs: {} > {}", pipelines.len(), MAX_CUS);
        SchedulerDispatch {
            config,
            pipelines,
            ert,
            registry: ContextRegistry::new(),
            global_bad_state: BadState::new(),
            next_seq: AtomicU64::new(1),
            reset_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn pipeline(&self, cu_index: u32) -> Option<&CuPipeline> {
        self.pipelines.get(cu_index as usize)
    }

    pub fn pipelines(&self) -> &[CuPipeline] {
        &self.pipelines
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_command(
        &self,
        client: ClientId,
        opcode: Opcode,
        target_cu: u32,
        payload: Vec<u8>,
        config_mode: ConfigMode,
        inkern_cb: Option<InKernelCallback>,
    ) -> Result<Submission> {
        if self.global_bad_state.is_set() {
            return Err(Error::Deadlock);
        }
        if !self.registry.has_open_contexts(client) {
            return Err(Error::Invalid("client has no open contexts".into()));
        }

        let seq_id = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let waiter = self.registry.client(client).waiter.clone();
        let cmd = Command::new(seq_id, client, opcode, target_cu, payload, config_mode, waiter, inkern_cb);
        let status = cmd.status.clone();

        if self.config.ert_enabled {
            let ert = self.ert.as_ref().ok_or_else(|| Error::Invalid("ERT path not configured".into()))?;
            ert.submit(cmd)?;
        } else {
            let pipeline = self
                .pipelines
                .get(target_cu as usize)
                .ok_or_else(|| Error::NoEnt(format!("no such CU: {target_cu}")))?;
            pipeline.submit(cmd)?;
        }
        Ok(Submission { seq_id, status })
    }

    /// Broadcasts abort to every CU pipeline for `client`.
    pub fn abort_client(&self, client: ClientId) {
        for pipeline in &self.pipelines {
            pipeline.abort(client);
        }
    }

    pub fn abort_done(&self, client: ClientId) -> bool {
        self.pipelines.iter().all(|p| p.abort_done(client))
    }

    /// Broadcasts reset to every CU pipeline (and the ERT path, if
    /// any), clearing global bad-state iff every one reports success.
    pub fn reset(&self) -> bool {
        let _guard = self.reset_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut all_ok = true;
        for pipeline in &self.pipelines {
            if !pipeline.reset() {
                all_ok = false;
            }
        }
        if let Some(ert) = &self.ert {
            if !ert.reset() {
                all_ok = false;
            }
        }
        if all_ok {
            self.global_bad_state.clear();
        } else {
            self.global_bad_state.set();
        }
        all_ok
    }

    pub fn set_global_bad_state(&self) {
        self.global_bad_state.set();
    }

    /// Explicit bad-state injection from a higher layer (§4.6's second
    /// trigger, alongside timeout and reset failure).
    pub fn set_cu_bad_state(&self, cu_index: u32) -> Result<()> {
        let pipeline = self
            .pipelines
            .get(cu_index as usize)
            .ok_or_else(|| Error::NoEnt(format!("no such CU: {cu_index}")))?;
        pipeline.set_bad_state();
        Ok(())
    }

    pub fn is_bad(&self) -> bool {
        self.global_bad_state.is_set()
    }

    /// pids of all currently registered clients, for diagnostics.
    pub fn live_clients(&self) -> Vec<ClientId> {
        self.registry.live_clients()
    }
}
