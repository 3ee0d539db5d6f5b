//! Scheduler-wide configuration.
//!
//! The original driver exposed `kds_mode` and `kds_echo` as module
//! parameters — global mutable statics poked at load time. Per the
//! design notes this becomes an ordinary configuration record, built
//! once and handed to [`crate::dispatch::SchedulerDispatch::new`]; it
//! is never mutated afterward.

use std::time::Duration;

/// Upper bound on the number of CUs a single scheduler instance may
/// manage, mirroring `MAX_CUS` in the original driver header.
pub const MAX_CUS: usize = 128;

#[derive(Clone, Debug)]
pub struct KdsConfig {
    /// Route commands through the embedded-scheduler ("ERT") path
    /// instead of directly to a CU pipeline. Complement of the
    /// original `kds_mode` parameter.
    pub ert_enabled: bool,
    /// Short-circuit every CU to complete instantly, for measuring the
    /// scheduler's own overhead independent of hardware latency. Carries
    /// over `kds_echo`. Credit is still acquired and released
    /// symmetrically (see the open question in the design notes).
    pub echo: bool,
    /// Default per-CU run timeout; zero disables timeout enforcement.
    /// Individual CU descriptors may override this.
    pub default_run_timeout: Duration,
}

impl Default for KdsConfig {
    fn default() -> Self {
        KdsConfig {
            ert_enabled: false,
            echo: false,
            default_run_timeout: Duration::from_secs(0),
        }
    }
}
