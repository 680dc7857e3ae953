//! The scheduler task: the single owner of every mutable gating structure.
//!
//! Everything in this module runs inside one `tokio::spawn`ed task (see
//! [`Dispatcher::run`]). Worker tasks for in-flight upstream calls are the
//! only other tasks this crate spawns; they talk back to the scheduler
//! exclusively through [`Msg`].

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant as TokioInstant;

use traffic_adaptive::AdaptiveLimiter;
use traffic_circuitbreaker::{is_eligible_failure, CircuitBreakerRegistry, CircuitState};
use traffic_concurrency::{ConcurrencyLimiter, ConcurrencySnapshot};
use traffic_core::events::EventListeners;
use traffic_core::{Clock, TrafficError, UpstreamFailure, UpstreamResponse};
use traffic_fallback::{select_fallback_target, FallbackChains, FallbackPolicyTable, PolicyMode};
use traffic_queue::{Priority, RequestId, RequestQueue};
use traffic_ratelimiter::{parse_rate_limit_headers, RateLimitSnapshot, RateLimitState, RateLimiterConfig};
use traffic_retry::{classify, BackoffConfig, FailureInfo, RetryEvent};

use crate::config::TrafficControllerConfig;
use crate::events::DispatcherEvent;
use crate::request::{CancellationToken, CreateFallbackFn, ExecuteFn, Request, RouteMetadata};

/// Per-tenant usage counters returned by `getTenantUsage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantUsage {
    /// Calls currently in flight for this tenant.
    pub in_flight: usize,
    /// Total calls ever dispatched for this tenant.
    pub total_dispatched: u64,
    /// Total terminal failures (after retries exhausted) for this tenant.
    pub total_failures: u64,
    /// Total retry attempts scheduled for this tenant.
    pub total_retries: u64,
    /// Total queue-wait timeouts for this tenant.
    pub total_queue_timeouts: u64,
}

pub(crate) struct PendingJob<T, E> {
    pub metadata: RouteMetadata,
    pub execute: ExecuteFn<T, E>,
    pub create_fallback_request: Option<CreateFallbackFn<T, E>>,
    pub deadline: Instant,
    pub enqueued_at: Instant,
    pub attempt: usize,
    pub not_before: Option<Instant>,
    pub cancellation: CancellationToken,
    pub result_tx: oneshot::Sender<Result<T, TrafficError<E>>>,
    pub settled_signal: Option<oneshot::Sender<()>>,
}

fn finish<T, E>(mut job: PendingJob<T, E>, result: Result<T, TrafficError<E>>) {
    if let Some(tx) = job.settled_signal.take() {
        let _ = tx.send(());
    }
    let _ = job.result_tx.send(result);
}

pub(crate) enum Msg<T, E> {
    Enqueue(Box<Request<T, E>>, Instant, oneshot::Sender<Result<T, TrafficError<E>>>),
    Settle {
        id: RequestId,
        route_key: String,
        tenant_id: String,
        outcome: Result<T, E>,
    },
    Cancel(RequestId),
    ApplyHeaders {
        route_key: String,
        headers: Vec<(String, String)>,
        reply: oneshot::Sender<RateLimitSnapshot>,
    },
    Report429 {
        tenant_id: String,
        route_key: String,
    },
    GetTenantUsage {
        tenant_id: String,
        reply: oneshot::Sender<(TenantUsage, ConcurrencySnapshot)>,
    },
    Shutdown(oneshot::Sender<()>),
}

pub(crate) type Sender<T, E> = mpsc::UnboundedSender<Msg<T, E>>;

enum CandidateOutcome {
    Progressed,
    Blocked(Option<Instant>),
}

/// The single owner of every gating structure: the request queue, the
/// three-tier concurrency counters, the per-route rate limiters and
/// circuits, the adaptive cooldown map, and the in-flight job table.
pub(crate) struct Dispatcher<T, E, C: Clock> {
    clock: C,
    rx: mpsc::UnboundedReceiver<Msg<T, E>>,
    tx: Sender<T, E>,
    next_id: u64,

    queue: RequestQueue<PendingJob<T, E>>,
    in_flight: HashMap<RequestId, PendingJob<T, E>>,
    pending_by_route: HashMap<String, BTreeSet<(Instant, RequestId)>>,
    half_open_in_flight: std::collections::HashSet<String>,

    concurrency: ConcurrencyLimiter,
    rate_limiters: HashMap<String, RateLimitState>,
    rate_limiter_configs: HashMap<String, RateLimiterConfig>,
    default_rate_limiter_config: RateLimiterConfig,
    circuits: CircuitBreakerRegistry,
    adaptive: AdaptiveLimiter,
    backoff: BackoffConfig,
    fallback_chains: FallbackChains,
    fallback_policies: FallbackPolicyTable,

    usage: HashMap<String, TenantUsage>,
    events: EventListeners<DispatcherEvent>,
}

impl<T, E, C> Dispatcher<T, E, C>
where
    T: UpstreamResponse + Send + 'static,
    E: UpstreamFailure + Send + 'static,
    C: Clock,
{
    pub(crate) fn spawn(config: TrafficControllerConfig, clock: C) -> Sender<T, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = clock.now();
        let dispatcher = Dispatcher {
            clock,
            rx,
            tx: tx.clone(),
            next_id: 0,
            queue: RequestQueue::new(),
            in_flight: HashMap::new(),
            pending_by_route: HashMap::new(),
            half_open_in_flight: std::collections::HashSet::new(),
            concurrency: ConcurrencyLimiter::new(config.concurrency),
            rate_limiters: HashMap::new(),
            rate_limiter_configs: config.rate_limiters_by_route,
            default_rate_limiter_config: config.default_rate_limiter,
            circuits: CircuitBreakerRegistry::new(config.circuit_breaker),
            adaptive: AdaptiveLimiter::new(config.adaptive),
            backoff: config.backoff,
            fallback_chains: config.fallback_chains,
            fallback_policies: config.fallback_policies,
            usage: HashMap::new(),
            events: config.event_listeners,
        };
        let _ = now;
        tokio::spawn(dispatcher.run());
        tx
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    fn emit(&self, event: DispatcherEvent) {
        self.events.emit(&event);
    }

    async fn run(mut self) {
        loop {
            let now = self.clock.now();
            let wake_at = self.earliest_wakeup(now);

            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg),
                        None => return,
                    }
                }
                _ = sleep_until_or_pending(wake_at) => {}
            }

            // Coalesce any messages that arrived synchronously alongside the
            // one that just woke us, so a burst of enqueues/settles triggers
            // one drain tick instead of one per message.
            while let Ok(msg) = self.rx.try_recv() {
                if matches!(msg, Msg::Shutdown(_)) {
                    self.handle_message(msg);
                    return;
                }
                self.handle_message(msg);
            }

            let now = self.clock.now();
            self.drain_tick(now);
        }
    }

    fn handle_message(&mut self, msg: Msg<T, E>) {
        let now = self.clock.now();
        match msg {
            Msg::Enqueue(request, deadline, result_tx) => self.handle_enqueue(*request, deadline, result_tx, now),
            Msg::Settle { id, route_key, tenant_id, outcome } => {
                self.handle_settle(id, route_key, tenant_id, outcome, now)
            }
            Msg::Cancel(id) => self.handle_cancel(id),
            Msg::ApplyHeaders { route_key, headers, reply } => {
                let snapshot = self.apply_headers(&route_key, &headers, now);
                let _ = reply.send(snapshot);
            }
            Msg::Report429 { tenant_id, route_key } => {
                self.adaptive.report_429(&tenant_id, &route_key, now);
            }
            Msg::GetTenantUsage { tenant_id, reply } => {
                let usage = self.usage.get(&tenant_id).copied().unwrap_or_default();
                let snapshot = self.concurrency.snapshot(&tenant_id, "");
                let _ = reply.send((usage, snapshot));
            }
            Msg::Shutdown(reply) => {
                self.drain_all_on_shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_enqueue(
        &mut self,
        request: Request<T, E>,
        deadline: Instant,
        result_tx: oneshot::Sender<Result<T, TrafficError<E>>>,
        now: Instant,
    ) {
        let id = self.next_request_id();
        let route_key = request.metadata.route_key();
        let tenant_id = request.metadata.tenant_id.clone();
        let priority = request.metadata.priority;

        let (settled_tx, settled_rx) = oneshot::channel();
        let job = PendingJob {
            metadata: request.metadata,
            execute: request.execute,
            create_fallback_request: request.create_fallback_request,
            deadline,
            enqueued_at: now,
            attempt: 0,
            not_before: None,
            cancellation: request.cancellation.clone(),
            result_tx,
            settled_signal: Some(settled_tx),
        };

        self.pending_by_route.entry(route_key.clone()).or_default().insert((now, id));
        self.queue.enqueue(id, tenant_id.clone(), priority, job);
        self.emit(DispatcherEvent::Enqueued { route_key, tenant_id, timestamp: now });

        let cancel_tx = self.tx.clone();
        let token = request.cancellation;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = cancel_tx.send(Msg::Cancel(id));
                }
                _ = settled_rx => {}
            }
        });
    }

    fn handle_cancel(&mut self, id: RequestId) {
        if let Some(job) = self.queue.remove(id) {
            self.pending_by_route.get_mut(&job.metadata.route_key()).map(|s| s.remove(&(job.enqueued_at, id)));
            finish(job, Err(TrafficError::Cancelled));
        }
        // An in-flight job already shares its cancellation token with the
        // running `execute` future; nothing further to do here.
    }

    fn handle_settle(&mut self, id: RequestId, route_key: String, tenant_id: String, outcome: Result<T, E>, now: Instant) {
        let Some(job) = self.in_flight.remove(&id) else {
            return;
        };
        self.concurrency.release(&tenant_id, &route_key);
        self.half_open_in_flight.remove(&route_key);
        if let Some(u) = self.usage.get_mut(&tenant_id) {
            u.in_flight = u.in_flight.saturating_sub(1);
        }

        match outcome {
            Ok(value) => {
                let headers = value.rate_limit_headers().to_vec();
                self.apply_headers(&route_key, &headers, now);
                self.circuits.record_success(&route_key, now);
                self.adaptive.report_success(&tenant_id, &route_key, now);
                if job.attempt > 0 {
                    self.backoff.emit(&RetryEvent::Success {
                        route_key: route_key.clone(),
                        timestamp: now,
                        attempts: job.attempt,
                    });
                }
                self.emit(DispatcherEvent::Settled { route_key, tenant_id, timestamp: now, succeeded: true });
                finish(job, Ok(value));
            }
            Err(err) => {
                let headers = err.rate_limit_headers().to_vec();
                self.apply_headers(&route_key, &headers, now);

                let failure_info = FailureInfo { status: err.status(), is_timeout: err.is_timeout() };
                let retriable = classify(&failure_info);
                if is_eligible_failure(failure_info.status, failure_info.is_timeout) {
                    self.circuits.record_eligible_failure(&route_key, now);
                } else {
                    self.circuits.record_non_eligible_failure(&route_key, now);
                }
                if failure_info.status == Some(429) {
                    self.adaptive.report_429(&tenant_id, &route_key, now);
                }

                match retriable {
                    Some(classification) if job.attempt < classification.max_attempts => {
                        self.usage.entry(tenant_id.clone()).or_default().total_retries += 1;
                        self.requeue_with_backoff(id, job, route_key, tenant_id, now);
                    }
                    Some(_) => {
                        self.backoff.emit(&RetryEvent::Exhausted {
                            route_key: route_key.clone(),
                            timestamp: now,
                            attempts: job.attempt,
                        });
                        self.usage.entry(tenant_id.clone()).or_default().total_failures += 1;
                        self.emit(DispatcherEvent::Settled { route_key, tenant_id, timestamp: now, succeeded: false });
                        finish(job, Err(TrafficError::Upstream(err)));
                    }
                    None => {
                        self.usage.entry(tenant_id.clone()).or_default().total_failures += 1;
                        self.emit(DispatcherEvent::Settled { route_key, tenant_id, timestamp: now, succeeded: false });
                        finish(job, Err(TrafficError::Upstream(err)));
                    }
                }
            }
        }
    }

    fn requeue_with_backoff(&mut self, id: RequestId, mut job: PendingJob<T, E>, route_key: String, tenant_id: String, now: Instant) {
        let mut rng = rand::rng();
        let attempt = job.attempt.max(1);
        let delay = self.backoff.sample(attempt, &mut rng);
        job.not_before = Some(now + delay);

        self.backoff.emit(&RetryEvent::Scheduled {
            route_key: route_key.clone(),
            timestamp: now,
            attempt,
            delay,
        });

        self.pending_by_route.entry(route_key).or_default().insert((job.enqueued_at, id));
        let priority = job.metadata.priority;
        self.queue.enqueue_front(id, tenant_id, priority, job);
    }

    fn apply_headers(&mut self, route_key: &str, headers: &[(String, String)], now: Instant) -> RateLimitSnapshot {
        let lookup = |key: &str| {
            headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        };
        let (parsed, _errors) = parse_rate_limit_headers(lookup, SystemTime::now());
        if !self.rate_limiters.contains_key(route_key) {
            let cfg = self
                .rate_limiter_configs
                .get(route_key)
                .cloned()
                .unwrap_or_else(|| self.default_rate_limiter_config.clone());
            self.rate_limiters.insert(route_key.to_string(), RateLimitState::new(&cfg, now));
        }
        let state = self.rate_limiters.get_mut(route_key).expect("just inserted");
        state.apply_headers(&parsed, now, SystemTime::now());
        state.snapshot()
    }

    fn drain_all_on_shutdown(&mut self) {
        while let Some(id) = self.queue.select_candidates().first().copied() {
            if let Some(job) = self.queue.remove(id) {
                finish(job, Err(TrafficError::Cancelled));
            }
        }
    }

    /// One full scheduling pass: repeatedly recompute candidates and act on
    /// the first one that makes progress, stopping once a whole pass over
    /// the current candidate list changes nothing.
    fn drain_tick(&mut self, now: Instant) {
        'outer: loop {
            let candidates = self.queue.select_candidates();
            if candidates.is_empty() {
                return;
            }
            for id in candidates {
                match self.evaluate_and_act(id, now) {
                    CandidateOutcome::Progressed => continue 'outer,
                    CandidateOutcome::Blocked(_) => continue,
                }
            }
            return;
        }
    }

    fn evaluate_and_act(&mut self, id: RequestId, now: Instant) -> CandidateOutcome {
        let Some(job) = self.queue.get(id) else {
            return CandidateOutcome::Blocked(None);
        };

        if now >= job.deadline {
            let job = self.queue.remove(id).expect("present");
            self.pending_by_route.get_mut(&job.metadata.route_key()).map(|s| s.remove(&(job.enqueued_at, id)));
            let waited = now.saturating_duration_since(job.enqueued_at);
            self.usage.entry(job.metadata.tenant_id.clone()).or_default().total_queue_timeouts += 1;
            finish(job, Err(TrafficError::QueueWaitTimeout { waited }));
            return CandidateOutcome::Progressed;
        }

        if let Some(not_before) = job.not_before {
            if now < not_before {
                return CandidateOutcome::Blocked(Some(not_before));
            }
        }

        let route_key = job.metadata.route_key();
        let tenant_id = job.metadata.tenant_id.clone();
        let task_type = job.metadata.task_type.clone().unwrap_or_default();
        let fallback_policy_id = job.metadata.fallback_policy_id.clone();
        let model = job.metadata.model.clone();

        let circuit_state = self.circuits.state(&route_key);
        if circuit_state != CircuitState::Closed {
            let already_probing = self.half_open_in_flight.contains(&route_key);
            let oldest = self
                .pending_by_route
                .get(&route_key)
                .and_then(|s| s.iter().next())
                .map(|(_, oldest_id)| *oldest_id);
            if already_probing || oldest != Some(id) {
                let retry_after = self.circuits.retry_after(&route_key, now).unwrap_or_default();
                return self.handle_circuit_rejected(
                    id,
                    &route_key,
                    &tenant_id,
                    &task_type,
                    fallback_policy_id.as_deref(),
                    &model,
                    now,
                    retry_after,
                );
            }
        }

        match self.circuits.try_acquire(&route_key, now) {
            Err(circuit_err) => {
                return self.handle_circuit_rejected(
                    id,
                    &route_key,
                    &tenant_id,
                    &task_type,
                    fallback_policy_id.as_deref(),
                    &model,
                    now,
                    circuit_err.retry_after(),
                );
            }
            Ok(()) => {
                if self.circuits.state(&route_key) == CircuitState::HalfOpen {
                    self.half_open_in_flight.insert(route_key.clone());
                }
            }
        }

        let reservation = match self.rate_limit_gate(&route_key, now) {
            Ok(r) => r,
            Err(retry_after) => {
                self.half_open_in_flight.remove(&route_key);
                return CandidateOutcome::Blocked(Some(now + retry_after));
            }
        };

        if let Err(cooldown) = self.adaptive.check(&tenant_id, &route_key, now) {
            let state = self.rate_limiters.get_mut(&route_key).expect("just inserted");
            state.cancel(reservation);
            self.half_open_in_flight.remove(&route_key);
            return CandidateOutcome::Blocked(Some(now + cooldown.retry_after));
        }

        if self.concurrency.try_acquire(&tenant_id, &route_key).is_err() {
            let state = self.rate_limiters.get_mut(&route_key).expect("just inserted");
            state.cancel(reservation);
            self.half_open_in_flight.remove(&route_key);
            return CandidateOutcome::Blocked(None);
        }

        let mut job = self.queue.remove(id).expect("present");
        self.pending_by_route.get_mut(&route_key).map(|s| s.remove(&(job.enqueued_at, id)));
        {
            let state = self.rate_limiters.get_mut(&route_key).expect("just inserted");
            state.confirm(reservation);
        }
        job.attempt += 1;
        self.emit(DispatcherEvent::Dispatched {
            route_key: route_key.clone(),
            tenant_id: tenant_id.clone(),
            timestamp: now,
            attempt: job.attempt,
        });
        self.spawn_worker(id, route_key, tenant_id, job);
        CandidateOutcome::Progressed
    }

    fn rate_limit_gate(&mut self, route_key: &str, now: Instant) -> Result<traffic_ratelimiter::Reservation, Duration> {
        if !self.rate_limiters.contains_key(route_key) {
            let cfg = self
                .rate_limiter_configs
                .get(route_key)
                .cloned()
                .unwrap_or_else(|| self.default_rate_limiter_config.clone());
            self.rate_limiters.insert(route_key.to_string(), RateLimitState::new(&cfg, now));
        }
        let state = self.rate_limiters.get_mut(route_key).expect("just inserted");
        state.try_reserve(now).map_err(|err| match err {
            traffic_ratelimiter::RateLimiterError::Exhausted { retry_after } => retry_after,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_circuit_rejected(
        &mut self,
        id: RequestId,
        route_key: &str,
        tenant_id: &str,
        task_type: &str,
        fallback_policy_id: Option<&str>,
        model: &str,
        now: Instant,
        retry_after: Duration,
    ) -> CandidateOutcome {
        let policy = self.fallback_policies.resolve(fallback_policy_id, task_type);
        match policy {
            PolicyMode::Wait => CandidateOutcome::Blocked(Some(now + retry_after)),
            PolicyMode::Fallback => {
                let chain = self.fallback_chains.resolve(route_key, model).to_vec();
                let circuits = &self.circuits;
                let target = select_fallback_target(&chain, |t| circuits.state(t) == CircuitState::Open);

                let job = self.queue.remove(id).expect("present");
                self.pending_by_route.get_mut(route_key).map(|s| s.remove(&(job.enqueued_at, id)));

                match target {
                    Some(target) => {
                        let target = target.to_string();
                        self.switch_to_fallback(job, &target, tenant_id, route_key, now);
                    }
                    None => {
                        self.usage.entry(tenant_id.to_string()).or_default().total_failures += 1;
                        finish(
                            job,
                            Err(TrafficError::CircuitOpen {
                                route_key: route_key.to_string(),
                                retry_after_ms: retry_after.as_millis() as u64,
                            }),
                        );
                    }
                }
                CandidateOutcome::Progressed
            }
        }
    }

    fn switch_to_fallback(&mut self, job: PendingJob<T, E>, target: &str, tenant_id: &str, from_route_key: &str, now: Instant) {
        let Some(create) = job.create_fallback_request.clone() else {
            finish(
                job,
                Err(TrafficError::CircuitOpen {
                    route_key: from_route_key.to_string(),
                    retry_after_ms: 0,
                }),
            );
            return;
        };
        let Some(new_request) = create(target) else {
            finish(
                job,
                Err(TrafficError::CircuitOpen {
                    route_key: from_route_key.to_string(),
                    retry_after_ms: 0,
                }),
            );
            return;
        };

        let new_route_key = new_request.metadata.route_key();
        let new_id = self.next_request_id();
        let new_job = PendingJob {
            metadata: new_request.metadata,
            execute: new_request.execute,
            create_fallback_request: new_request.create_fallback_request,
            deadline: job.deadline,
            enqueued_at: job.enqueued_at,
            attempt: 0,
            not_before: None,
            cancellation: job.cancellation,
            result_tx: job.result_tx,
            settled_signal: job.settled_signal,
        };

        self.pending_by_route
            .entry(new_route_key.clone())
            .or_default()
            .insert((new_job.enqueued_at, new_id));
        self.queue.enqueue(new_id, tenant_id.to_string(), new_job.metadata.priority, new_job);
        self.emit(DispatcherEvent::FallbackSwitched {
            from_route_key: from_route_key.to_string(),
            to_route_key: new_route_key,
            tenant_id: tenant_id.to_string(),
            timestamp: now,
        });
    }

    fn spawn_worker(&mut self, id: RequestId, route_key: String, tenant_id: String, mut job: PendingJob<T, E>) {
        let usage = self.usage.entry(tenant_id.clone()).or_default();
        usage.in_flight += 1;
        usage.total_dispatched += 1;

        let execute = job.execute.clone();
        let cancellation = job.cancellation.clone();
        let tx = self.tx.clone();
        job.not_before = None;
        self.in_flight.insert(id, job);

        tokio::spawn(async move {
            let outcome = execute(cancellation).await;
            let _ = tx.send(Msg::Settle { id, route_key, tenant_id, outcome });
        });
    }

    fn earliest_wakeup(&self, now: Instant) -> Option<Instant> {
        let mut wake: Option<Instant> = None;
        let mut consider = |candidate: Instant| {
            wake = Some(wake.map_or(candidate, |w| w.min(candidate)));
        };

        for job in self.queue_iter_payloads() {
            if let Some(not_before) = job.not_before {
                if not_before > now {
                    consider(not_before);
                }
            }
            if job.deadline > now {
                consider(job.deadline);
            }
        }
        for (route_key, state) in &self.rate_limiters {
            let next = state.next_wakeup(now);
            if next > now && self.pending_by_route.get(route_key).is_some_and(|s| !s.is_empty()) {
                consider(next);
            }
        }
        wake
    }

    /// Helper used only to scan `not_before`/`deadline` for the wakeup timer;
    /// avoids a dedicated iterator on `RequestQueue` by walking
    /// `select_candidates` plus each candidate's payload (sufficient since
    /// only a bucket's head is ever gated on `not_before`, and the head is
    /// always the bucket's earliest deadline since queue order is FIFO).
    fn queue_iter_payloads(&self) -> impl Iterator<Item = &PendingJob<T, E>> {
        self.queue.select_candidates().into_iter().filter_map(move |id| self.queue.get(id))
    }
}

async fn sleep_until_or_pending(wake_at: Option<Instant>) {
    match wake_at {
        Some(instant) => tokio::time::sleep_until(TokioInstant::from_std(instant)).await,
        None => std::future::pending::<()>().await,
    }
}
