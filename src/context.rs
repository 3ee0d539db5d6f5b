//! Client context registry (§4.3): the per-client table of
//! `{cu_index -> access mode}` that authorizes submissions, and the
//! bitstream lock lifecycle it is coupled to.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

pub type ClientId = u64;
pub type XclbinId = [u8; 16];

/// CU index a context may target; `Virtual` is the sentinel that lets a
/// client hold the bitstream lock without reserving a concrete CU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CuIndex {
    Cu(u32),
    Virtual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Shared,
    Exclusive,
    /// Metadata-only: set automatically for contexts opened on
    /// [`CuIndex::Virtual`], regardless of the mode the caller passed.
    Virtual,
}

/// `(cu_index, mode)`, as returned by diagnostics and used internally
/// by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextInfo {
    pub cu_index: CuIndex,
    pub mode: AccessMode,
}

/// The wake primitive a client's file handle polls on: readable
/// whenever the event counter is positive, a read-equivalent
/// decrements it by one.
#[derive(Default)]
pub struct ClientWaiter {
    count: Mutex<u64>,
    cv: Condvar,
}

impl ClientWaiter {
    pub fn new() -> Arc<ClientWaiter> {
        Arc::new(ClientWaiter::default())
    }

    /// Invoked by a worker's notify path on every terminal command.
    pub fn wake(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.cv.notify_all();
    }

    /// Non-blocking poll: true if the event counter is positive.
    pub fn readable(&self) -> bool {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) > 0
    }

    /// The read-equivalent of poll(): decrements the counter by one if
    /// positive, returning whether there was anything to read.
    pub fn read(&self) -> bool {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks until the event counter is positive or `timeout` elapses.
    pub fn wait(&self, timeout: std::time::Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .cv
            .wait_timeout_while(count, timeout, |c| *c == 0)
            .unwrap_or_else(|e| e.into_inner());
        *guard > 0
    }
}

/// A registered submitter: pid plus the state §3 attaches to it.
pub struct Client {
    pub id: ClientId,
    contexts: Mutex<HashMap<CuIndex, AccessMode>>,
    xclbin: Mutex<Option<XclbinId>>,
    pub waiter: Arc<ClientWaiter>,
}

impl Client {
    fn new(id: ClientId) -> Client {
        Client {
            id,
            contexts: Mutex::new(HashMap::new()),
            xclbin: Mutex::new(None),
            waiter: ClientWaiter::new(),
        }
    }

    /// True iff the client currently holds at least one context —
    /// equivalently, iff the bitstream lock is held on its behalf.
    pub fn has_contexts(&self) -> bool {
        !self.contexts.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn contexts(&self) -> Vec<ContextInfo> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(&cu_index, &mode)| ContextInfo { cu_index, mode })
            .collect()
    }
}

struct Bitstream {
    xclbin: Option<XclbinId>,
    refcount: u32,
}

/// Per-CU exclusivity bookkeeping, global across all clients —
/// `open_context`'s exclusive-mode rule needs visibility into every
/// other client holding the same CU, not just the caller's own map.
type CuHolders = HashMap<u32, HashMap<ClientId, AccessMode>>;

pub struct ContextRegistry {
    clients: Mutex<HashMap<ClientId, Arc<Client>>>,
    holders: Mutex<CuHolders>,
    bitstream: Mutex<Bitstream>,
}

impl ContextRegistry {
    pub fn new() -> ContextRegistry {
        ContextRegistry {
            clients: Mutex::new(HashMap::new()),
            holders: Mutex::new(HashMap::new()),
            bitstream: Mutex::new(Bitstream { xclbin: None, refcount: 0 }),
        }
    }

    /// Fetches (creating if necessary) the registry entry for `client`.
    pub fn client(&self, client: ClientId) -> Arc<Client> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients
            .entry(client)
            .or_insert_with(|| Arc::new(Client::new(client)))
            .clone()
    }

    pub fn has_open_contexts(&self, client: ClientId) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&client)
            .map(|c| c.has_contexts())
            .unwrap_or(false)
    }

    /// pids of all currently registered clients, for diagnostics.
    pub fn live_clients(&self) -> Vec<ClientId> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }

    pub fn open_context(
        &self,
        client: ClientId,
        xclbin_id: XclbinId,
        cu_index: CuIndex,
        mode: AccessMode,
    ) -> Result<()> {
        let entry = self.client(client);
        // Concurrent opens/closes on the same client are serialized by
        // this per-client mutex, per §4.3's invariant.
        let mut contexts = entry.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let first_context = contexts.is_empty();

        if first_context {
            self.lock_bitstream(xclbin_id)?;
        } else {
            let held = *entry.xclbin.lock().unwrap_or_else(|e| e.into_inner());
            if held != Some(xclbin_id) {
                return Err(Error::Busy("client already locked to a different xclbin".into()));
            }
        }

        let stored_mode = match cu_index {
            CuIndex::Virtual => AccessMode::Virtual,
            CuIndex::Cu(idx) => {
                if let Err(e) = self.reserve_cu(idx, client, mode) {
                    if first_context {
                        self.unlock_bitstream();
                    }
                    return Err(e);
                }
                mode
            }
        };

        contexts.insert(cu_index, stored_mode);
        if first_context {
            *entry.xclbin.lock().unwrap_or_else(|e| e.into_inner()) = Some(xclbin_id);
        }
        log::info!("client {} opened context on {:?} ({:?})", client, cu_index, stored_mode);
        Ok(())
    }

    pub fn close_context(&self, client: ClientId, xclbin_id: XclbinId, cu_index: CuIndex) -> Result<()> {
        let entry = self.client(client);
        let mut contexts = entry.contexts.lock().unwrap_or_else(|e| e.into_inner());

        let held = *entry.xclbin.lock().unwrap_or_else(|e| e.into_inner());
        if held != Some(xclbin_id) {
            return Err(Error::Busy("context close with mismatched xclbin id".into()));
        }

        if contexts.remove(&cu_index).is_none() {
            return Err(Error::Invalid(format!("no open context on {:?}", cu_index)));
        }

        if let CuIndex::Cu(idx) = cu_index {
            self.release_cu(idx, client);
        }

        if contexts.is_empty() {
            *entry.xclbin.lock().unwrap_or_else(|e| e.into_inner()) = None;
            self.unlock_bitstream();
        }
        log::info!("client {} closed context on {:?}", client, cu_index);
        Ok(())
    }

    fn reserve_cu(&self, idx: u32, client: ClientId, mode: AccessMode) -> Result<()> {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        let cu_holders = holders.entry(idx).or_default();

        let any_exclusive = cu_holders.values().any(|m| *m == AccessMode::Exclusive);
        if any_exclusive || (mode == AccessMode::Exclusive && !cu_holders.is_empty()) {
            return Err(Error::Busy(format!("CU {idx} is held exclusively")));
        }

        cu_holders.insert(client, mode);
        Ok(())
    }

    fn release_cu(&self, idx: u32, client: ClientId) {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cu_holders) = holders.get_mut(&idx) {
            cu_holders.remove(&client);
            if cu_holders.is_empty() {
                holders.remove(&idx);
            }
        }
    }

    fn lock_bitstream(&self, xclbin_id: XclbinId) -> Result<()> {
        let mut bs = self.bitstream.lock().unwrap_or_else(|e| e.into_inner());
        match bs.xclbin {
            Some(locked) if locked != xclbin_id => {
                Err(Error::Busy("bitstream locked to a different xclbin".into()))
            }
            Some(_) => {
                bs.refcount += 1;
                Ok(())
            }
            None => {
                bs.xclbin = Some(xclbin_id);
                bs.refcount = 1;
                Ok(())
            }
        }
    }

    fn unlock_bitstream(&self) {
        let mut bs = self.bitstream.lock().unwrap_or_else(|e| e.into_inner());
        if bs.refcount > 0 {
            bs.refcount -= 1;
        }
        if bs.refcount == 0 {
            bs.xclbin = None;
        }
    }

    /// True iff the bitstream lock is currently held by anyone —
    /// `client.contexts = ∅ ⇔ bitstream lock released` holds per-client;
    /// this is the aggregate view used by diagnostics.
    pub fn bitstream_locked(&self) -> bool {
        self.bitstream.lock().unwrap_or_else(|e| e.into_inner()).xclbin.is_some()
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}
