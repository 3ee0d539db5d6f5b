//! Scenario 5 (spec.md §8): client abort while commands are in
//! flight on one CU.

use std::time::Duration;

use crate::command::CommandState;
use crate::context::CuIndex;
use crate::tests::mock_cu::MockCuHandle;
use crate::tests::{build_dispatch, open_shared, submit_start, wait_terminal};

#[test]
fn abort_terminates_queued_commands_and_acks() {
    // One credit so at most one command is ever in the submitted
    // queue at a time; the other two stay in `running`.
    let mock = MockCuHandle::new(1);
    let dispatch = build_dispatch(vec![mock.clone()], Duration::from_secs(0));
    let client = 1;
    open_shared(&dispatch, client, [4u8; 16], 0);

    let submissions: Vec<_> = (0..3).map(|i| submit_start(&dispatch, client, 0, vec![i as u8; 8])).collect();

    // Give the worker a chance to launch the first command onto
    // hardware; the other two remain queued.
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(mock.start_count(), 1);

    dispatch.abort_client(client);

    // Wait for the abort to be acknowledged.
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while !dispatch.abort_done(client) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(dispatch.abort_done(client));

    // The in-flight command either completed naturally or was marked
    // aborted, depending on whether the mock hardware finished first.
    mock.complete(1);
    let first_state = wait_terminal(&submissions[0].status, Duration::from_secs(1));
    assert!(matches!(first_state, CommandState::Completed | CommandState::Abort));

    for submission in &submissions[1..] {
        let state = wait_terminal(&submission.status, Duration::from_secs(1));
        assert_eq!(state, CommandState::Abort);
    }

    dispatch.registry().close_context(client, [4u8; 16], CuIndex::Cu(0)).unwrap();
    assert!(!dispatch.registry().bitstream_locked());
}

#[test]
fn abort_on_a_bad_state_cu_acks_bad_not_done() {
    use crate::health::EventState;

    // One credit: the command is launched straight onto "hardware"
    // (the submitted queue) and the mock never reports it done, the
    // same "hardware stuck" condition spec.md §4.1/§4.6 call out.
    let mock = MockCuHandle::new(1);
    let dispatch = build_dispatch(vec![mock.clone()], Duration::from_secs(0));
    let client = 1;
    open_shared(&dispatch, client, [8u8; 16], 0);

    let _submission = submit_start(&dispatch, client, 0, vec![0u8; 8]);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(mock.start_count(), 1);

    // Latch bad state externally (e.g. a higher layer giving up on the
    // CU) while the command is still held by hardware, then abort.
    dispatch.set_cu_bad_state(0).unwrap();
    dispatch.abort_client(client);

    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while !dispatch.abort_done(client) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(dispatch.abort_done(client));
    assert_eq!(dispatch.pipeline(0).unwrap().abort_event_state(client), Some(EventState::Bad));
}
