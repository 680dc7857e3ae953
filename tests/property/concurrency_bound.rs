//! The three-tier concurrency limiter must never admit more in-flight calls
//! than its configured caps, for any interleaving of acquire/release calls.

use proptest::prelude::*;
use traffic_concurrency::{ConcurrencyLimiter, ConcurrencyLimiterConfig};

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire { tenant: u8, route: u8 },
    Release { tenant: u8, route: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0u8..3).prop_map(|(tenant, route)| Op::Acquire { tenant, route }),
        (0u8..3, 0u8..3).prop_map(|(tenant, route)| Op::Release { tenant, route }),
    ]
}

proptest! {
    #[test]
    fn caps_are_never_exceeded(ops in prop::collection::vec(op_strategy(), 0..500)) {
        let global_max = 4usize;
        let tenant_max = 2usize;
        let route_max = 3usize;
        let mut limiter = ConcurrencyLimiter::new(
            ConcurrencyLimiterConfig::builder()
                .global_max(global_max)
                .tenant_max(tenant_max)
                .route_max(route_max)
                .build(),
        );

        // Track which (tenant, route) pairs we believe are currently holding
        // a slot, so Release ops only fire for pairs that actually acquired.
        let mut held: Vec<(u8, u8)> = Vec::new();
        let mut global_in_flight = 0usize;

        for op in ops {
            match op {
                Op::Acquire { tenant, route } => {
                    let tenant_key = format!("tenant-{tenant}");
                    let route_key = format!("route-{route}");
                    match limiter.try_acquire(&tenant_key, &route_key) {
                        Ok(()) => {
                            global_in_flight += 1;
                            held.push((tenant, route));
                            prop_assert!(global_in_flight <= global_max);

                            let tenant_count = held.iter().filter(|(t, _)| *t == tenant).count();
                            prop_assert!(tenant_count <= tenant_max);
                            let route_count = held.iter().filter(|(_, r)| *r == route).count();
                            prop_assert!(route_count <= route_max);
                        }
                        Err(_) => {}
                    }
                }
                Op::Release { tenant, route } => {
                    if let Some(pos) = held.iter().position(|&(t, r)| t == tenant && r == route) {
                        held.remove(pos);
                        global_in_flight -= 1;
                        let tenant_key = format!("tenant-{tenant}");
                        let route_key = format!("route-{route}");
                        limiter.release(&tenant_key, &route_key);
                    }
                }
            }
        }

        let snapshot = limiter.snapshot("tenant-0", "route-0");
        prop_assert!(snapshot.global_in_flight <= global_max);
    }
}
