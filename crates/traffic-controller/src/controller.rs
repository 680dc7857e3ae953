//! Public facade over the scheduler task.

use tokio::sync::oneshot;

use traffic_concurrency::ConcurrencySnapshot;
use traffic_core::{Clock, SystemClock, TrafficError, UpstreamFailure, UpstreamResponse};
use traffic_ratelimiter::RateLimitSnapshot;

use crate::config::TrafficControllerConfig;
use crate::dispatcher::{Dispatcher, Msg, Sender, TenantUsage};
use crate::request::Request;

/// Mediates every call to a set of upstream routes (`provider::model` pairs)
/// through one priority/tenant-fair queue, a three-tier concurrency limiter,
/// a reservation-based rate limiter, a circuit breaker with fallback chains,
/// and an adaptive 429 cooldown.
///
/// All mutable state lives in a single scheduler task spawned by
/// [`TrafficController::new`]; every method here is a cheap message send
/// across a channel. Cloning a controller clones only the channel handle, so
/// it's safe to share across an arbitrary number of callers.
pub struct TrafficController<T, E, C: Clock = SystemClock> {
    tx: Sender<T, E>,
    clock: C,
}

impl<T, E> TrafficController<T, E, SystemClock>
where
    T: UpstreamResponse + Send + 'static,
    E: UpstreamFailure + Send + 'static,
{
    /// Spawns the scheduler task with the system clock.
    pub fn new(config: TrafficControllerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<T, E, C> TrafficController<T, E, C>
where
    T: UpstreamResponse + Send + 'static,
    E: UpstreamFailure + Send + 'static,
    C: Clock,
{
    /// Spawns the scheduler task with an explicit clock, primarily for
    /// tests that need to control time deterministically.
    pub fn with_clock(config: TrafficControllerConfig, clock: C) -> Self {
        let tx = Dispatcher::spawn(config, clock.clone());
        Self { tx, clock }
    }

    /// Submits `request` and waits for it to settle: dispatched and
    /// completed, exhausted its retries, switched to a fallback that itself
    /// settled, timed out in queue, was cancelled, or was rejected by a
    /// locally-enforced gate with no fallback available.
    pub async fn handle(&self, request: Request<T, E>) -> Result<T, TrafficError<E>> {
        let now = self.clock.now();
        let deadline = now + request.max_queue_wait;
        let (result_tx, result_rx) = oneshot::channel();

        if self.tx.send(Msg::Enqueue(Box::new(request), deadline, result_tx)).is_err() {
            return Err(TrafficError::Bug("dispatcher task is gone".to_string()));
        }

        match result_rx.await {
            Ok(result) => result,
            Err(_) => Err(TrafficError::Bug("dispatcher task dropped the reply channel".to_string())),
        }
    }

    /// Feeds rate limit headers observed on an out-of-band call (e.g. a
    /// streaming response whose chunks bypass [`TrafficController::handle`])
    /// back into the named route's rate limiter state.
    pub async fn apply_headers(&self, route_key: impl Into<String>, headers: Vec<(String, String)>) -> RateLimitSnapshot {
        let (reply, reply_rx) = oneshot::channel();
        let route_key = route_key.into();
        if self.tx.send(Msg::ApplyHeaders { route_key, headers, reply }).is_err() {
            return RateLimitSnapshot::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Reports a 429 observed on an out-of-band call, advancing the named
    /// tenant/route pair's adaptive cooldown the same way a `handle`d
    /// request's own 429 would.
    pub fn report_stream_failure(&self, tenant_id: impl Into<String>, route_key: impl Into<String>) {
        let _ = self.tx.send(Msg::Report429 {
            tenant_id: tenant_id.into(),
            route_key: route_key.into(),
        });
    }

    /// Current usage counters and concurrency snapshot for `tenant_id`.
    pub async fn tenant_usage(&self, tenant_id: impl Into<String>) -> (TenantUsage, ConcurrencySnapshot) {
        let (reply, reply_rx) = oneshot::channel();
        let tenant_id = tenant_id.into();
        if self.tx.send(Msg::GetTenantUsage { tenant_id, reply }).is_err() {
            return (TenantUsage::default(), ConcurrencySnapshot::default());
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Drains the queue, failing every still-queued request with
    /// [`TrafficError::Cancelled`], and waits for the scheduler task to
    /// acknowledge. In-flight calls are left to finish on their own; their
    /// results are delivered to callers as usual.
    pub async fn shutdown(self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown(reply)).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

impl<T, E, C: Clock> Clone for TrafficController<T, E, C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            clock: self.clock.clone(),
        }
    }
}
