//! The CU driver interface (§4.2): the narrow capability set any CU
//! backend — HLS, PLRAM, ACC, or a future protocol — must implement.
//!
//! All operations here are assumed non-blocking and are called
//! directly on the per-CU worker thread; an implementation that
//! allocates or blocks here stalls every command on that CU.

use bitflags::bitflags;

bitflags! {
    /// Interrupt mask bits, matching `CU_INTR_DONE` / `CU_INTR_READY`
    /// in the original header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IntrMask: u32 {
        const DONE  = 0b01;
        const READY = 0b10;
    }
}

/// Hardware model tag carried on a [`CuDescriptor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CuModel {
    Hls,
    Acc,
    Plram,
}

/// Start/check protocol a CU backend realizes. Different protocols
/// differ in how `start`/`check` are implemented but present the same
/// capability contract to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CuProtocol {
    CtrlHs,
    CtrlChain,
    CtrlNone,
    CtrlMe,
    CtrlAcc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgDir {
    None,
    Input,
    Output,
}

/// One entry of a CU's argument schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub dir: ArgDir,
}

/// How a command's payload is written to CU registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigMode {
    /// Payload is a contiguous register image written at `base + offset`.
    Consecutive,
    /// Payload is a sequence of `(offset, value)` pairs written individually.
    Pairs,
}

/// Immutable-after-init description of a single CU, owned by
/// [`crate::dispatch::SchedulerDispatch`] and referenced by its
/// [`crate::pipeline::CuPipeline`].
#[derive(Clone, Debug)]
pub struct CuDescriptor {
    pub model: CuModel,
    pub logical_index: u32,
    pub instance_index: u32,
    pub base_address: u64,
    pub protocol: CuProtocol,
    pub interrupt_id: u32,
    pub interrupt_enable: bool,
    pub args: Vec<ArgSpec>,
    /// Kernel name, e.g. `vadd`. Carried over from `xrt_cu_info::kname`
    /// for the readiness probe.
    pub kernel_name: String,
    /// Instance name, e.g. `vadd_1`. Carried over from `xrt_cu_info::iname`.
    pub instance_name: String,
}

/// Deltas since the previous `check()` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CuStatus {
    pub num_done: u32,
    pub num_ready: u32,
}

/// The capability set a CU backend provides. Implementations must be
/// `Send` (they are owned by the dedicated per-CU worker thread) and
/// every method here must be non-blocking and allocation-free.
pub trait CuDriver: Send {
    /// Attempt to reserve one credit. Returns the new available count;
    /// zero or negative means none was free and nothing was reserved.
    fn alloc_credit(&mut self) -> i32;

    /// Return `n` credits.
    fn free_credit(&mut self, n: u32);

    /// Side-effect-free credit check.
    fn peek_credit(&self) -> i32;

    /// Write the argument image to CU registers.
    fn configure(&mut self, payload: &[u8], mode: ConfigMode);

    /// Assert the CU start control.
    fn start(&mut self);

    /// Read CU status registers, returning deltas since the previous call.
    fn check(&mut self) -> CuStatus;

    /// Issue a reset. Non-blocking; completion is observed via `reset_done`.
    fn reset(&mut self);

    /// Whether a previously issued reset has completed.
    fn reset_done(&mut self) -> bool;

    fn enable_intr(&mut self, mask: IntrMask);

    fn disable_intr(&mut self, mask: IntrMask);

    /// Clear and return the interrupt bits that had fired.
    fn clear_intr(&mut self) -> IntrMask;
}
