//! Tenants of equal priority continuously offering work on the same route
//! should be dispatched in a round-robin-ish order: across any window of
//! dispatches, no tenant should be starved while another gets serviced
//! repeatedly.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use traffic_concurrency::ConcurrencyLimiterConfig;
use traffic_core::{UpstreamFailure, UpstreamResponse};
use traffic_controller::{Request, RouteMetadata, TrafficController, TrafficControllerConfig};

#[derive(Debug, Clone, Default)]
struct Resp;
impl UpstreamResponse for Resp {}

#[derive(Debug, Clone, Default)]
struct Fail;
impl UpstreamFailure for Fail {}

proptest! {
    #[test]
    fn equal_priority_tenants_interleave_fairly(tenant_count in 2usize..5, per_tenant in 3usize..8) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let config = TrafficControllerConfig::builder()
                .concurrency(
                    ConcurrencyLimiterConfig::builder()
                        .global_max(1)
                        .tenant_max(per_tenant)
                        .route_max(per_tenant * tenant_count)
                        .build(),
                )
                .build();
            let controller: TrafficController<Resp, Fail> = TrafficController::new(config);

            let order = Arc::new(Mutex::new(Vec::new()));
            let mut handles = Vec::new();
            // Submit in strict round-robin order so the queue receives all
            // tenants' work before the single concurrency slot can drain it.
            for _ in 0..per_tenant {
                for tenant in 0..tenant_count {
                    let order = order.clone();
                    let meta = RouteMetadata::new("openai", "gpt-4", format!("tenant-{tenant}"));
                    let req = Request::builder(meta, move |_token| {
                        let order = order.clone();
                        async move {
                            order.lock().unwrap().push(tenant);
                            Ok(Resp)
                        }
                    })
                    .build();
                    let c = controller.clone();
                    handles.push(tokio::spawn(async move { c.handle(req).await }));
                }
            }

            for h in handles {
                prop_assert!(h.await.unwrap().is_ok());
            }

            let order = order.lock().unwrap();
            prop_assert_eq!(order.len(), tenant_count * per_tenant);

            // Over any contiguous window the size of the tenant count, no
            // tenant should appear more than twice (once from this window,
            // once carried over from fair round-robin slack).
            for window in order.windows(tenant_count * 2) {
                let mut counts = vec![0usize; tenant_count];
                for &t in window {
                    counts[t] += 1;
                }
                let max = *counts.iter().max().unwrap();
                let min = *counts.iter().min().unwrap();
                prop_assert!(max - min <= 2, "uneven dispatch distribution in window: {:?}", counts);
            }
            Ok(())
        })?;
    }
}
