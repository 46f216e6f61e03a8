//! Property-based tests for quota accounting

use examgen::quota::{MemoryQuotaStore, QuotaGate};
use examgen::types::UserId;
use proptest::prelude::*;
use std::sync::Arc;

/// remaining == max(0, initial - successes) for any number of consume calls
#[test]
fn test_consume_never_goes_below_zero() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(0u32..50, 0usize..80), |(initial, attempts)| {
            let gate = QuotaGate::new(Arc::new(MemoryQuotaStore::new()));
            let user = UserId::new("prop");
            gate.set(&user, initial).unwrap();

            let successes = (0..attempts)
                .filter(|_| gate.consume(&user).unwrap())
                .count() as u32;

            prop_assert_eq!(successes, initial.min(attempts as u32));
            prop_assert_eq!(
                gate.check_available(&user).unwrap(),
                initial.saturating_sub(successes)
            );
            Ok(())
        })
        .unwrap();
}
