//! The sysfs-equivalent readiness probe (§6): text dumps of per-CU
//! queue depths, credit counters, done/ready totals, and CU info.

use std::fmt;

use crate::dispatch::SchedulerDispatch;
use crate::pipeline::PipelineSnapshot;

impl fmt::Display for PipelineSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "CU[{}]:", self.index)?;
        writeln!(
            f,
            "  queues: pending={} running={} submitted={} completed={}",
            self.pending, self.running, self.submitted, self.completed
        )?;
        writeln!(f, "  credits: {}/{}", self.credits_in_use, self.credits_max)?;
        writeln!(f, "  totals: done={} ready={}", self.done_total, self.ready_total)?;
        writeln!(f, "  bad_state: {}", self.bad_state)
    }
}

/// A full readiness-probe dump across every CU pipeline plus the
/// static CU info table, matching what the original driver exposed
/// under `/sys/bus/pci/devices/.../kds_custat` and `kds_icustat`.
pub struct ReadinessReport<'a>(pub &'a SchedulerDispatch);

impl fmt::Display for ReadinessReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "kds bad_state: {}", self.0.is_bad())?;
        for pipeline in self.0.pipelines() {
            write!(f, "{}", pipeline.snapshot())?;
            let d = &pipeline.descriptor;
            writeln!(
                f,
                "  info: model={:?} protocol={:?} inst={} base=0x{:x} kernel={} instance={}",
                d.model, d.protocol, d.instance_index, d.base_address, d.kernel_name, d.instance_name
            )?;
        }
        Ok(())
    }
}

impl SchedulerDispatch {
    pub fn readiness_report(&self) -> String {
        ReadinessReport(self).to_string()
    }
}
