//! For the window rate-limit strategy, `remaining + reserved` must never
//! exceed `limit`, and `remaining` must never increase except at a window
//! roll (which this test never advances past, so it must only ever
//! decrease or hold steady).

use std::time::{Duration, Instant};

use proptest::prelude::*;
use traffic_ratelimiter::{RateLimitState, RateLimiterConfig, RateLimiterStrategy};

#[derive(Debug, Clone, Copy)]
enum Op {
    Reserve,
    Confirm,
    Cancel,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Reserve),
        Just(Op::Confirm),
        Just(Op::Cancel),
    ]
}

proptest! {
    #[test]
    fn remaining_plus_reserved_never_exceeds_limit(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let limit = 10u32;
        let now = Instant::now();
        let mut state = RateLimitState::new(
            &RateLimiterConfig::builder()
                .strategy(RateLimiterStrategy::Window)
                .default_limit(limit)
                .window(Duration::from_secs(3600))
                .build(),
            now,
        );

        let mut outstanding = Vec::new();
        let mut last_remaining = limit;

        for op in ops {
            match op {
                Op::Reserve => {
                    if let Ok(r) = state.try_reserve(now) {
                        outstanding.push(r);
                    }
                }
                Op::Confirm => {
                    if let Some(r) = outstanding.pop() {
                        state.confirm(r);
                    }
                }
                Op::Cancel => {
                    if let Some(r) = outstanding.pop() {
                        state.cancel(r);
                    }
                }
            }

            let snap = state.snapshot();
            let remaining = snap.remaining.unwrap();
            let reserved = snap.reserved.unwrap();
            prop_assert!(remaining + reserved <= limit);
            // Cancel can restore a slot, so remaining only monotonically
            // decreases across Reserve/Confirm; it may rise back on Cancel.
            if !matches!(op, Op::Cancel) {
                prop_assert!(remaining <= last_remaining);
            }
            last_remaining = remaining;
        }
    }
}
