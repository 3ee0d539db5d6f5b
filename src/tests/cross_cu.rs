//! Scenario 6 (spec.md §8): a bad-state latch on one CU does not
//! block another CU, and a global reset clears both.

use std::time::Duration;

use crate::tests::mock_cu::MockCuHandle;
use crate::tests::{build_dispatch, open_shared, submit_start, wait_terminal};

#[test]
fn independent_cus_and_global_reset() {
    let mock0 = MockCuHandle::new(2);
    let mock1 = MockCuHandle::new(2);
    let dispatch = build_dispatch(vec![mock0, mock1.clone()], Duration::from_millis(10));
    let client = 1;
    open_shared(&dispatch, client, [6u8; 16], 0);
    open_shared(&dispatch, client, [6u8; 16], 1);

    // CU 0: let its only command time out and latch bad state.
    let timed_out = submit_start(&dispatch, client, 0, vec![0u8; 8]);
    let state = wait_terminal(&timed_out.status, Duration::from_secs(1));
    assert_eq!(state, crate::command::CommandState::Timeout);
    assert!(dispatch.pipeline(0).unwrap().bad_state());
    assert!(!dispatch.is_bad());

    // CU 1 keeps accepting and completing commands.
    let still_works = submit_start(&dispatch, client, 1, vec![1u8; 8]);
    std::thread::sleep(Duration::from_millis(20));
    mock1.complete(1);
    let state = wait_terminal(&still_works.status, Duration::from_secs(1));
    assert_eq!(state, crate::command::CommandState::Completed);

    // A global reset clears CU 0's bad state too.
    assert!(dispatch.reset());
    assert!(!dispatch.pipeline(0).unwrap().bad_state());
    assert!(!dispatch.pipeline(1).unwrap().bad_state());
    assert!(!dispatch.is_bad());
}
