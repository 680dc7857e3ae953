//! End-to-end scenario tests for the traffic controller, each one driving
//! the dispatcher's scheduler task through a concrete sequence of enqueues,
//! settles, and time advances under a paused clock.
//!
//! The dispatcher's own [`traffic_core::Clock`] must track the same virtual
//! timeline `tokio::time::advance` moves, or its internal `not_before`/
//! deadline comparisons would race real wall-clock time instead. `PausedClock`
//! below bridges the two by reading `tokio::time::Instant::now()`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use traffic_adaptive::AdaptiveLimiterConfig;
use traffic_circuitbreaker::CircuitBreakerConfig;
use traffic_concurrency::ConcurrencyLimiterConfig;
use traffic_core::{Clock, TrafficError, UpstreamFailure, UpstreamResponse};
use traffic_fallback::{FallbackChains, FallbackPolicyTable, PolicyMode};
use traffic_ratelimiter::{RateLimiterConfig, RateLimiterStrategy};
use traffic_controller::{Request, RouteMetadata, TrafficController, TrafficControllerConfig};

#[derive(Clone, Copy, Debug, Default)]
struct PausedClock;

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

#[derive(Debug, Clone, Default)]
struct Resp {
    headers: Vec<(String, String)>,
}

impl UpstreamResponse for Resp {
    fn rate_limit_headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

#[derive(Debug, Clone, Default)]
struct Fail {
    status: Option<u16>,
    is_timeout: bool,
    headers: Vec<(String, String)>,
}

impl UpstreamFailure for Fail {
    fn status(&self) -> Option<u16> {
        self.status
    }
    fn is_timeout(&self) -> bool {
        self.is_timeout
    }
    fn rate_limit_headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl Fail {
    fn status(code: u16) -> Self {
        Self {
            status: Some(code),
            ..Default::default()
        }
    }
}

type Controller = TrafficController<Resp, Fail, PausedClock>;

fn ok() -> Result<Resp, Fail> {
    Ok(Resp::default())
}

#[tokio::test(start_paused = true)]
async fn scenario_1_queue_wait_timeout() {
    let config = TrafficControllerConfig::builder()
        .concurrency(
            ConcurrencyLimiterConfig::builder()
                .global_max(1)
                .tenant_max(1)
                .route_max(1)
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    let meta_a = RouteMetadata::new("openai", "gpt-4", "tenant-a");
    let req_a = Request::builder(meta_a, |_token| async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        ok()
    })
    .build();

    let b_invoked = Arc::new(AtomicBool::new(false));
    let b_invoked2 = b_invoked.clone();
    let meta_b = RouteMetadata::new("openai", "gpt-4", "tenant-b");
    let req_b = Request::builder(meta_b, move |_token| {
        let flag = b_invoked2.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            ok()
        }
    })
    .max_queue_wait(Duration::from_millis(500))
    .build();

    let c1 = controller.clone();
    let handle_a = tokio::spawn(async move { c1.handle(req_a).await });
    let c2 = controller.clone();
    let handle_b = tokio::spawn(async move { c2.handle(req_b).await });

    tokio::time::advance(Duration::from_millis(600)).await;
    let result_b = handle_b.await.unwrap();
    match result_b {
        Err(TrafficError::QueueWaitTimeout { waited }) => {
            assert!(waited >= Duration::from_millis(400));
            assert!(waited <= Duration::from_millis(700));
        }
        other => panic!("expected queue wait timeout, got {other:?}"),
    }
    assert!(!b_invoked.load(Ordering::SeqCst), "B's execute must never run");

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(handle_a.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn scenario_2_drain_coalescing() {
    let config = TrafficControllerConfig::builder()
        .concurrency(
            ConcurrencyLimiterConfig::builder()
                .global_max(1)
                .tenant_max(10)
                .route_max(10)
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..10 {
        let dispatched = dispatched.clone();
        let meta = RouteMetadata::new("openai", "gpt-4", format!("tenant-{i}"));
        let req = Request::builder(meta, move |_token| {
            let dispatched = dispatched.clone();
            async move {
                dispatched.lock().unwrap().push(i);
                ok()
            }
        })
        .build();
        let c = controller.clone();
        handles.push(tokio::spawn(async move { c.handle(req).await }));
    }

    tokio::time::advance(Duration::from_millis(1)).await;
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(dispatched.lock().unwrap().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn scenario_3_rate_limit_wakeup() {
    let config = TrafficControllerConfig::builder()
        .concurrency(ConcurrencyLimiterConfig::builder().global_max(2).tenant_max(2).route_max(2).build())
        .default_rate_limiter(
            RateLimiterConfig::builder()
                .strategy(RateLimiterStrategy::TokenBucket)
                .token_capacity(1)
                .token_refill_per_sec(2.0)
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    let dispatched_at = Arc::new(Mutex::new(Vec::new()));
    let start = tokio::time::Instant::now();

    let mut handles = Vec::new();
    for name in ["a", "b"] {
        let dispatched_at = dispatched_at.clone();
        let meta = RouteMetadata::new("openai", "gpt-4", format!("tenant-{name}"));
        let req = Request::builder(meta, move |_token| {
            let dispatched_at = dispatched_at.clone();
            async move {
                dispatched_at.lock().unwrap().push(tokio::time::Instant::now() - start);
                ok()
            }
        })
        .build();
        let c = controller.clone();
        handles.push(tokio::spawn(async move { c.handle(req).await }));
    }

    tokio::time::advance(Duration::from_millis(700)).await;
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }

    let timestamps = dispatched_at.lock().unwrap();
    assert_eq!(timestamps.len(), 2);
    let first = timestamps.iter().min().unwrap();
    let second = timestamps.iter().max().unwrap();
    assert!(*first < Duration::from_millis(50));
    assert!(*second >= Duration::from_millis(450) && *second <= Duration::from_millis(650));
}

#[tokio::test(start_paused = true)]
async fn scenario_4_tenant_round_robin() {
    let config = TrafficControllerConfig::builder()
        .concurrency(
            ConcurrencyLimiterConfig::builder()
                .global_max(1)
                .tenant_max(10)
                .route_max(10)
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for tenant in ["tenant-1", "tenant-1", "tenant-1", "tenant-2", "tenant-2", "tenant-2"] {
        let order = order.clone();
        let meta = RouteMetadata::new("openai", "gpt-4", tenant);
        let req = Request::builder(meta, move |_token| {
            let order = order.clone();
            let tenant = tenant.to_string();
            async move {
                order.lock().unwrap().push(tenant);
                ok()
            }
        })
        .build();
        let c = controller.clone();
        handles.push(tokio::spawn(async move { c.handle(req).await }));
    }

    tokio::time::advance(Duration::from_millis(1)).await;
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 6);
    let mut run_len = 1;
    for window in order.windows(2) {
        if window[0] == window[1] {
            run_len += 1;
            assert!(run_len <= 2, "no tenant should run more than twice in a row: {order:?}");
        } else {
            run_len = 1;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_5_circuit_open_wait_policy() {
    let config = TrafficControllerConfig::builder()
        .circuit_breaker(
            CircuitBreakerConfig::builder()
                .failure_threshold(5)
                .open_duration(Duration::from_secs(5))
                .build(),
        )
        .fallback_policies(FallbackPolicyTable::builder().default_policy_id("wait").policy("wait", PolicyMode::Wait).build())
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    for _ in 0..5 {
        let meta = RouteMetadata::new("openai", "gpt-4", "tenant-a");
        let req = Request::builder(meta, |_token| async move { Err(Fail::status(500)) }).build();
        let result = controller.handle(req).await;
        assert!(result.is_err());
        tokio::time::advance(Duration::from_millis(1)).await;
    }

    let invoked = Arc::new(AtomicBool::new(false));
    let invoked2 = invoked.clone();
    let meta = RouteMetadata::new("openai", "gpt-4", "tenant-a");
    let req = Request::builder(meta, move |_token| {
        let invoked2 = invoked2.clone();
        async move {
            invoked2.store(true, Ordering::SeqCst);
            ok()
        }
    })
    .max_queue_wait(Duration::from_secs(10))
    .build();
    let c = controller.clone();
    let handle = tokio::spawn(async move { c.handle(req).await });

    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(!invoked.load(Ordering::SeqCst), "execute must not run while circuit is open");

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(handle.await.unwrap().is_ok());
    assert!(invoked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn scenario_6_circuit_open_fallback_switch() {
    let config = TrafficControllerConfig::builder()
        .circuit_breaker(
            CircuitBreakerConfig::builder()
                .failure_threshold(5)
                .open_duration(Duration::from_secs(30))
                .build(),
        )
        .fallback_chains(FallbackChains::builder().chain("openai::primary", vec!["openai::secondary".to_string()]).build())
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    for _ in 0..5 {
        let meta = RouteMetadata::new("openai", "primary", "tenant-a");
        let req = Request::builder(meta, |_token| async move { Err(Fail::status(500)) }).build();
        let _ = controller.handle(req).await;
        tokio::time::advance(Duration::from_millis(1)).await;
    }

    let primary_invoked = Arc::new(AtomicUsize::new(0));
    let secondary_invoked = Arc::new(AtomicBool::new(false));

    let p = primary_invoked.clone();
    let s = secondary_invoked.clone();
    let meta = RouteMetadata::new("openai", "primary", "tenant-a");
    let req = Request::builder(meta, move |_token| {
        p.fetch_add(1, Ordering::SeqCst);
        async move { Err(Fail::status(500)) }
    })
    .create_fallback_request(move |target| {
        assert_eq!(target, "openai::secondary");
        let s = s.clone();
        let meta = RouteMetadata::new("openai", "secondary", "tenant-a");
        Some(
            Request::builder(meta, move |_token| {
                let s = s.clone();
                async move {
                    s.store(true, Ordering::SeqCst);
                    ok()
                }
            })
            .build(),
        )
    })
    .build();

    let result = controller.handle(req).await;
    assert!(result.is_ok());
    assert_eq!(primary_invoked.load(Ordering::SeqCst), 0, "primary must not be invoked again while open");
    assert!(secondary_invoked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn scenario_7_adaptive_per_tenant_isolation() {
    let config = TrafficControllerConfig::builder()
        .adaptive(
            AdaptiveLimiterConfig::builder()
                .threshold(1)
                .window(Duration::from_secs(10))
                .base_penalty(Duration::from_secs(5))
                .min_penalty(Duration::from_millis(100))
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    controller.report_stream_failure("tenant-1", "openai::gpt-4").await;
    controller.report_stream_failure("tenant-1", "openai::gpt-4").await;
    tokio::task::yield_now().await;

    let meta_other = RouteMetadata::new("openai", "gpt-4", "tenant-2");
    let req_other = Request::builder(meta_other, |_token| async move { ok() }).build();
    let other_start = tokio::time::Instant::now();
    let other_result = controller.handle(req_other).await;
    assert!(other_result.is_ok());
    assert!(tokio::time::Instant::now() - other_start < Duration::from_millis(100));

    let penalized_invoked = Arc::new(AtomicBool::new(false));
    let flag = penalized_invoked.clone();
    let meta_penalized = RouteMetadata::new("openai", "gpt-4", "tenant-1");
    let req_penalized = Request::builder(meta_penalized, move |_token| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            ok()
        }
    })
    .max_queue_wait(Duration::from_secs(10))
    .build();
    let c = controller.clone();
    let handle = tokio::spawn(async move { c.handle(req_penalized).await });

    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(!penalized_invoked.load(Ordering::SeqCst), "tenant-1 must stay in cooldown");

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn scenario_8_non_eligible_failure_clears_circuit_state() {
    let config = TrafficControllerConfig::builder()
        .circuit_breaker(
            CircuitBreakerConfig::builder()
                .failure_threshold(5)
                .open_duration(Duration::from_secs(5))
                .half_open_max_concurrent(1)
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    for _ in 0..5 {
        let meta = RouteMetadata::new("openai", "gpt-4", "tenant-a");
        let req = Request::builder(meta, |_token| async move { Err(Fail::status(500)) }).build();
        let _ = controller.handle(req).await;
        tokio::time::advance(Duration::from_millis(1)).await;
    }

    tokio::time::advance(Duration::from_secs(5)).await;

    let meta = RouteMetadata::new("openai", "gpt-4", "tenant-a");
    let req = Request::builder(meta, |_token| async move { Err(Fail::status(400)) }).build();
    let result = controller.handle(req).await;
    assert!(matches!(result, Err(TrafficError::Upstream(_))));

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let meta = RouteMetadata::new("openai", "gpt-4", "tenant-a");
    let req = Request::builder(meta, move |_token| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            ok()
        }
    })
    .build();
    assert!(controller.handle(req).await.is_ok());
    assert!(invoked.load(Ordering::SeqCst), "circuit must no longer block calls");
}

#[tokio::test(start_paused = true)]
async fn scenario_9_wakeup_coalescing_to_earliest() {
    let config = TrafficControllerConfig::builder()
        .concurrency(ConcurrencyLimiterConfig::builder().global_max(2).tenant_max(2).route_max(2).build())
        .rate_limiter_for_route(
            "openai::a",
            RateLimiterConfig::builder()
                .strategy(RateLimiterStrategy::TokenBucket)
                .token_capacity(1)
                .token_refill_per_sec(0.5)
                .build(),
        )
        .rate_limiter_for_route(
            "openai::b",
            RateLimiterConfig::builder()
                .strategy(RateLimiterStrategy::TokenBucket)
                .token_capacity(1)
                .token_refill_per_sec(5.0)
                .build(),
        )
        .build();
    let controller: Controller = TrafficController::with_clock(config, PausedClock);

    // Exhaust both buckets' single token up front so the next request on
    // each route key must wait for a refill.
    for model in ["a", "b"] {
        let meta = RouteMetadata::new("openai", model, "tenant-seed");
        let req = Request::builder(meta, |_token| async move { ok() }).build();
        assert!(controller.handle(req).await.is_ok());
    }

    let start = tokio::time::Instant::now();
    let dispatched_at: Arc<Mutex<Vec<(&'static str, Duration)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for model in ["a", "b"] {
        let dispatched_at = dispatched_at.clone();
        let meta = RouteMetadata::new("openai", model, "tenant-x");
        let req = Request::builder(meta, move |_token| {
            let dispatched_at = dispatched_at.clone();
            async move {
                dispatched_at.lock().unwrap().push((model, tokio::time::Instant::now() - start));
                ok()
            }
        })
        .max_queue_wait(Duration::from_secs(5))
        .build();
        let c = controller.clone();
        handles.push(tokio::spawn(async move { c.handle(req).await }));
    }

    tokio::time::advance(Duration::from_millis(250)).await;
    let b_times: Vec<_> = dispatched_at.lock().unwrap().iter().filter(|(m, _)| *m == "b").map(|(_, d)| *d).collect();
    assert_eq!(b_times.len(), 1, "B must have dispatched by ~200ms without waiting on A's 2s wakeup");
    assert!(b_times[0] < Duration::from_millis(250));

    tokio::time::advance(Duration::from_secs(2)).await;
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    let a_times: Vec<_> = dispatched_at.lock().unwrap().iter().filter(|(m, _)| *m == "a").map(|(_, d)| *d).collect();
    assert_eq!(a_times.len(), 1);
    assert!(a_times[0] >= Duration::from_millis(1_900));
}
