//! Round-trip / idempotence properties from spec.md §8 exercised
//! directly against the mock driver, independent of the pipeline.

use crate::cu::CuDriver;
use crate::tests::mock_cu::MockCuHandle;

#[test]
fn peek_credit_has_no_side_effect() {
    let mock = MockCuHandle::new(4);
    let mut driver = mock.driver();
    let before = driver.peek_credit();
    let _ = driver.peek_credit();
    let _ = driver.peek_credit();
    assert_eq!(driver.peek_credit(), before);
}

#[test]
fn alloc_then_free_restores_available_count() {
    let mock = MockCuHandle::new(4);
    let mut driver = mock.driver();
    let before = driver.peek_credit();
    driver.alloc_credit();
    driver.free_credit(1);
    assert_eq!(driver.peek_credit(), before);
}
