
mod abort;
mod contexts;
mod cross_cu;
mod invariants;

use std::time::Duration;

use crate::command::Opcode;
use crate::config::KdsConfig;
use crate::context::{AccessMode, CuIndex};
use crate::cu::{ArgDir, ArgSpec, ConfigMode, CuDescriptor, CuModel, CuProtocol};
use crate::dispatch::SchedulerDispatch;
use crate::pipeline::{CuPipeline, PipelineConfig};

use mock_cu::MockCuHandle;

pub(crate) fn descriptor(idx: u32) -> CuDescriptor {
    CuDescriptor {
        model: CuModel::Hls,
        logical_index: idx,
        instance_index: idx,
        base_address: 0x1_0000 * (idx as u64 + 1),
        protocol: CuProtocol::CtrlHs,
        interrupt_id: idx,
        interrupt_enable: false,
        args: vec![ArgSpec { name: "a".into(), offset: 0x10, size: 4, dir: ArgDir::Input }],
        kernel_name: "vadd".into(),
        instance_name: format!("vadd_{idx}"),
    }
}

pub(crate) fn pipeline_config(max_credits: u32, run_timeout: Duration) -> PipelineConfig {
    PipelineConfig { max_credits, run_timeout, echo: false }
}

/// Builds a one-or-more-CU dispatch, each backed by a `MockCuHandle`
/// so the test can drive completions directly.
pub(crate) fn build_dispatch(mocks: Vec<MockCuHandle>, run_timeout: Duration) -> SchedulerDispatch {
    let pipelines = mocks
        .iter()
        .enumerate()
        .map(|(i, mock)| {
            let cfg = pipeline_config(mock_credits(mock), run_timeout);
            CuPipeline::new(descriptor(i as u32), mock.driver(), cfg)
        })
        .collect();
    SchedulerDispatch::new(KdsConfig::default(), pipelines, None)
}

fn mock_credits(_mock: &MockCuHandle) -> u32 {
    // Credit accounting lives entirely in the mock driver; the
    // pipeline's own `max_credits` field is advisory (used only by the
    // readiness probe), so any value works here.
    64
}

pub(crate) fn open_shared(dispatch: &SchedulerDispatch, client: u64, xclbin: [u8; 16], cu: u32) {
    dispatch.registry().open_context(client, xclbin, CuIndex::Cu(cu), AccessMode::Shared).unwrap();
}

pub(crate) fn submit_start(
    dispatch: &SchedulerDispatch,
    client: u64,
    cu: u32,
    payload: Vec<u8>,
) -> crate::dispatch::Submission {
    dispatch.add_command(client, Opcode::StartCu, cu, payload, ConfigMode::Consecutive, None).unwrap()
}

/// Polls `status` until it reaches a terminal state or `timeout` elapses.
pub(crate) fn wait_terminal(
    status: &crate::command::StatusWord,
    timeout: Duration,
) -> crate::command::CommandState {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let state = status.get();
        if state.is_terminal() || std::time::Instant::now() >= deadline {
            return state;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
