//! The public request type submitted to a [`crate::TrafficController`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use traffic_queue::Priority;

/// A boxed, `'static` future, used throughout the dispatcher so `execute`
/// and fallback-construction closures don't need a named future type.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cooperative cancellation signal shared between a request and whatever
/// `execute` closure is running it.
///
/// Cloning is cheap; every clone observes the same cancellation. Unlike
/// `tokio_util::sync::CancellationToken` this carries no child-token tree —
/// the dispatcher only ever needs one flat signal per request.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    /// Creates a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// `true` once [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once this token is cancelled. If it is already cancelled,
    /// resolves immediately.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing and scheduling metadata carried by every request, independent of
/// its payload type.
#[derive(Debug, Clone)]
pub struct RouteMetadata {
    /// Upstream provider, e.g. `"openai"`.
    pub provider: String,
    /// Upstream model, e.g. `"gpt-4"`.
    pub model: String,
    /// Caller-supplied classification (`"chat"`, `"embedding"`, ...), used
    /// to resolve a default fallback policy when the request names none.
    pub task_type: Option<String>,
    /// The tenant this request is billed/fairness-accounted against.
    pub tenant_id: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Explicit fallback policy reference, if the caller wants to override
    /// the task-type/table-wide default.
    pub fallback_policy_id: Option<String>,
    /// Free-form metadata available to event listeners and fallback
    /// construction, but not interpreted by the dispatcher itself.
    pub extra: HashMap<String, String>,
}

impl RouteMetadata {
    /// Creates metadata for a `provider`/`model` pair, owned by `tenant_id`.
    pub fn new(provider: impl Into<String>, model: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            task_type: None,
            tenant_id: tenant_id.into(),
            priority: Priority::P1,
            fallback_policy_id: None,
            extra: HashMap::new(),
        }
    }

    /// Sets the task type.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets an explicit fallback policy reference.
    pub fn with_fallback_policy_id(mut self, id: impl Into<String>) -> Self {
        self.fallback_policy_id = Some(id.into());
        self
    }

    /// The key used to look up rate limiter, circuit breaker, and fallback
    /// chain state: `"{provider}::{model}"`.
    pub fn route_key(&self) -> String {
        format!("{}::{}", self.provider, self.model)
    }
}

/// A reusable continuation that performs one attempt of the upstream call.
///
/// `Arc`-wrapped rather than `FnOnce` because the dispatcher may invoke the
/// same request's continuation more than once across retries.
pub type ExecuteFn<T, E> = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Builds a fallback [`Request`] targeting `provider::model`, given the
/// original request's payload semantics. Returns `None` if no fallback
/// should be attempted for this target (e.g. the caller has nothing
/// meaningful to send a different model).
pub type CreateFallbackFn<T, E> = Arc<dyn Fn(&str) -> Option<Request<T, E>> + Send + Sync>;

/// One call submitted to the traffic controller.
///
/// Built with [`RequestBuilder`] and submitted via
/// [`crate::TrafficController::handle`].
pub struct Request<T, E> {
    pub(crate) metadata: RouteMetadata,
    pub(crate) execute: ExecuteFn<T, E>,
    pub(crate) create_fallback_request: Option<CreateFallbackFn<T, E>>,
    pub(crate) max_queue_wait: Duration,
    pub(crate) cancellation: CancellationToken,
}

impl<T, E> Request<T, E> {
    /// Creates a new builder for a request targeting `metadata`'s route,
    /// calling `execute` to perform each attempt.
    pub fn builder<F, Fut>(metadata: RouteMetadata, execute: F) -> RequestBuilder<T, E>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        RequestBuilder {
            metadata,
            execute: Arc::new(move |token| Box::pin(execute(token))),
            create_fallback_request: None,
            max_queue_wait: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Builder for [`Request`].
pub struct RequestBuilder<T, E> {
    metadata: RouteMetadata,
    execute: ExecuteFn<T, E>,
    create_fallback_request: Option<CreateFallbackFn<T, E>>,
    max_queue_wait: Duration,
    cancellation: CancellationToken,
}

impl<T, E> RequestBuilder<T, E> {
    /// Registers a closure building a fallback request for a given
    /// `provider::model` target, used when this request's own route's
    /// circuit is open and its resolved policy is
    /// [`traffic_fallback::PolicyMode::Fallback`].
    pub fn create_fallback_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<Request<T, E>> + Send + Sync + 'static,
    {
        self.create_fallback_request = Some(Arc::new(f));
        self
    }

    /// Sets the maximum time this request may wait in queue before it is
    /// settled with [`traffic_core::TrafficError::QueueWaitTimeout`].
    ///
    /// Default: 30s
    pub fn max_queue_wait(mut self, wait: Duration) -> Self {
        self.max_queue_wait = wait;
        self
    }

    /// Supplies a caller-owned cancellation token. The caller can call
    /// [`CancellationToken::cancel`] on their retained clone at any time to
    /// cancel this request, whether queued or in flight.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builds the request.
    pub fn build(self) -> Request<T, E> {
        Request {
            metadata: self.metadata,
            execute: self.execute,
            create_fallback_request: self.create_fallback_request,
            max_queue_wait: self.max_queue_wait,
            cancellation: self.cancellation,
        }
    }
}
