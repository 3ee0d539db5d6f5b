//! Scenario 4 (spec.md §8): exclusive-context contention between two
//! clients on the same CU.

use crate::context::{AccessMode, CuIndex};
use crate::error::Error;
use crate::tests::mock_cu::MockCuHandle;
use crate::tests::build_dispatch;
use std::time::Duration;

#[test]
fn exclusive_contention_resolves_on_close() {
    let mock = MockCuHandle::new(4);
    let dispatch = build_dispatch(vec![mock], Duration::from_secs(0));
    let registry = dispatch.registry();
    let xclbin = [9u8; 16];
    let (client_a, client_b) = (1u64, 2u64);

    registry.open_context(client_a, xclbin, CuIndex::Cu(0), AccessMode::Exclusive).unwrap();

    let err = registry.open_context(client_b, xclbin, CuIndex::Cu(0), AccessMode::Exclusive).unwrap_err();
    assert!(matches!(err, Error::Busy(_)));

    let err = registry.open_context(client_b, xclbin, CuIndex::Cu(0), AccessMode::Shared).unwrap_err();
    assert!(matches!(err, Error::Busy(_)));

    registry.close_context(client_a, xclbin, CuIndex::Cu(0)).unwrap();
    assert!(!registry.bitstream_locked());

    registry.open_context(client_b, xclbin, CuIndex::Cu(0), AccessMode::Exclusive).unwrap();
    assert!(registry.bitstream_locked());
}

#[test]
fn shared_contexts_coexist() {
    let mock = MockCuHandle::new(4);
    let dispatch = build_dispatch(vec![mock], Duration::from_secs(0));
    let registry = dispatch.registry();
    let xclbin = [5u8; 16];

    registry.open_context(1, xclbin, CuIndex::Cu(0), AccessMode::Shared).unwrap();
    registry.open_context(2, xclbin, CuIndex::Cu(0), AccessMode::Shared).unwrap();

    let err = registry.open_context(3, xclbin, CuIndex::Cu(0), AccessMode::Exclusive).unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
}

#[test]
fn virtual_context_locks_bitstream_without_cu_contention() {
    let mock = MockCuHandle::new(4);
    let dispatch = build_dispatch(vec![mock], Duration::from_secs(0));
    let registry = dispatch.registry();
    let xclbin = [7u8; 16];

    registry.open_context(1, xclbin, CuIndex::Virtual, AccessMode::Shared).unwrap();
    // A second client may also hold the virtual slot concurrently —
    // it reserves no real CU resource.
    registry.open_context(2, xclbin, CuIndex::Virtual, AccessMode::Exclusive).unwrap();
    assert!(registry.bitstream_locked());

    registry.close_context(1, xclbin, CuIndex::Virtual).unwrap();
    assert!(registry.bitstream_locked());
    registry.close_context(2, xclbin, CuIndex::Virtual).unwrap();
    assert!(!registry.bitstream_locked());
}

#[test]
fn close_with_wrong_xclbin_is_rejected() {
    let mock = MockCuHandle::new(4);
    let dispatch = build_dispatch(vec![mock], Duration::from_secs(0));
    let registry = dispatch.registry();

    registry.open_context(1, [1u8; 16], CuIndex::Cu(0), AccessMode::Shared).unwrap();
    let err = registry.close_context(1, [2u8; 16], CuIndex::Cu(0)).unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
}
