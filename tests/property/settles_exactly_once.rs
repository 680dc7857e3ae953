//! Every request submitted to a controller settles exactly once: callers
//! never see two replies, and never hang forever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use traffic_concurrency::ConcurrencyLimiterConfig;
use traffic_core::{UpstreamFailure, UpstreamResponse};
use traffic_controller::{Request, RouteMetadata, TrafficController, TrafficControllerConfig};

#[derive(Debug, Clone, Default)]
struct Resp;
impl UpstreamResponse for Resp {}

#[derive(Debug, Clone, Default)]
struct Fail {
    status: Option<u16>,
}
impl UpstreamFailure for Fail {
    fn status(&self) -> Option<u16> {
        self.status
    }
}

proptest! {
    #[test]
    fn every_request_settles_exactly_once(outcomes in prop::collection::vec(any::<bool>(), 1..40)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let config = TrafficControllerConfig::builder()
                .concurrency(
                    ConcurrencyLimiterConfig::builder()
                        .global_max(4)
                        .tenant_max(4)
                        .route_max(4)
                        .build(),
                )
                .build();
            let controller: TrafficController<Resp, Fail> = TrafficController::new(config);

            let settle_counts = Arc::new(
                (0..outcomes.len()).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>(),
            );

            let mut handles = Vec::new();
            for (i, succeed) in outcomes.iter().enumerate() {
                let succeed = *succeed;
                let meta = RouteMetadata::new("openai", "gpt-4", format!("tenant-{}", i % 3));
                let req = Request::builder(meta, move |_token| async move {
                    if succeed {
                        Ok(Resp)
                    } else {
                        Err(Fail { status: Some(400) })
                    }
                })
                .build();
                let c = controller.clone();
                let counts = settle_counts.clone();
                handles.push(tokio::spawn(async move {
                    let _ = c.handle(req).await;
                    counts[i].fetch_add(1, Ordering::SeqCst);
                }));
            }

            for h in handles {
                h.await.unwrap();
            }

            for count in settle_counts.iter() {
                prop_assert_eq!(count.load(Ordering::SeqCst), 1);
            }
            Ok(())
        })?;
    }
}
