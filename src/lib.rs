//! Kernel-driven scheduler core.
//!
//! This crate implements the per-CU command pipeline of an
//! accelerator scheduler: a four-stage queue machine (pending,
//! running, submitted, completed) driven by one dedicated worker
//! thread per compute unit, a credit-based admission protocol against
//! an abstract CU driver interface, a client context registry that
//! authorizes submissions against a bitstream lock, and the
//! cooperative abort / bad-state machinery that contains faults to a
//! single CU (or, in the worst case, the whole device).
//!
//! The host I/O control path (ioctl framing, memory-mapped command
//! buffer lookup), bitstream *loading*, interrupt bus plumbing, and
//! the register-level encoding of individual CU operations are all
//! out of scope — this crate depends only on the abstract
//! [`cu::CuDriver`] capability interface.

pub mod command;
pub mod config;
pub mod context;
pub mod cu;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod sysfs;

pub use command::{Command, CommandState, InKernelCallback, Opcode, StatusWord};
pub use config::KdsConfig;
pub use context::{AccessMode, ClientId, ContextInfo, ContextRegistry, CuIndex, XclbinId};
pub use cu::{ArgDir, ArgSpec, ConfigMode, CuDescriptor, CuDriver, CuModel, CuProtocol, CuStatus, IntrMask};
pub use dispatch::{ErtPath, SchedulerDispatch, Submission};
pub use error::{Error, Result};
pub use health::{AbortEvent, BadState, EventState};
pub use pipeline::{CuPipeline, PipelineConfig, PipelineSnapshot};

#[cfg(test)]
mod tests;
