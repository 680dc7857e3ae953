use std::collections::{HashMap, VecDeque};

use crate::priority::Priority;

/// Opaque identifier handed back by [`RequestQueue::enqueue`] and used by
/// [`RequestQueue::remove`] to pull a specific request back out, e.g. when
/// its caller cancels while it is still waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

type TenantId = String;

struct PriorityTier<T> {
    /// Tenants with at least one pending request at this priority, in
    /// round-robin order. The tenant at the front is served next.
    ring: VecDeque<TenantId>,
    per_tenant: HashMap<TenantId, VecDeque<(RequestId, T)>>,
}

impl<T> Default for PriorityTier<T> {
    fn default() -> Self {
        Self {
            ring: VecDeque::new(),
            per_tenant: HashMap::new(),
        }
    }
}

impl<T> PriorityTier<T> {
    fn push(&mut self, tenant_id: TenantId, id: RequestId, payload: T) {
        let bucket = self.per_tenant.entry(tenant_id.clone()).or_default();
        if bucket.is_empty() {
            self.ring.push_back(tenant_id);
        }
        bucket.push_back((id, payload));
    }

    /// Like `push`, but the request goes to the front of its tenant's own
    /// bucket rather than the back. Used to requeue a retried request ahead
    /// of that tenant's other pending work. Does not disturb the tenant's
    /// position in the ring.
    fn push_front(&mut self, tenant_id: TenantId, id: RequestId, payload: T) {
        let bucket = self.per_tenant.entry(tenant_id.clone()).or_default();
        if bucket.is_empty() {
            self.ring.push_back(tenant_id);
        }
        bucket.push_front((id, payload));
    }

    fn get(&self, tenant_id: &str, id: RequestId) -> Option<&T> {
        self.per_tenant
            .get(tenant_id)?
            .iter()
            .find(|(req_id, _)| *req_id == id)
            .map(|(_, payload)| payload)
    }

    /// One candidate per tenant currently in the ring, front-of-bucket,
    /// in ring order. Does not mutate the ring.
    fn candidates(&self) -> Vec<RequestId> {
        self.ring
            .iter()
            .filter_map(|tenant| self.per_tenant.get(tenant))
            .filter_map(|bucket| bucket.front())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Removes a request from a tenant's bucket. If the request was at the
    /// front of the bucket, the tenant is rotated to the back of the ring so
    /// the next tenant gets a turn. If the bucket becomes empty the tenant
    /// leaves the ring entirely.
    fn remove(&mut self, tenant_id: &str, id: RequestId) -> Option<T> {
        let bucket = self.per_tenant.get_mut(tenant_id)?;
        let was_front = bucket.front().is_some_and(|(front_id, _)| *front_id == id);
        let pos = bucket.iter().position(|(req_id, _)| *req_id == id)?;
        let (_, payload) = bucket.remove(pos)?;

        if bucket.is_empty() {
            self.per_tenant.remove(tenant_id);
            self.ring.retain(|t| t != tenant_id);
        } else if was_front {
            if let Some(pos) = self.ring.iter().position(|t| t == tenant_id) {
                if let Some(t) = self.ring.remove(pos) {
                    self.ring.push_back(t);
                }
            }
        }

        Some(payload)
    }

    fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn len(&self) -> usize {
        self.per_tenant.values().map(VecDeque::len).sum()
    }
}

/// Priority-ordered, tenant round-robin request queue.
///
/// `T` is the dispatcher's own request payload; this queue only tracks
/// ordering, not upstream-call semantics.
pub struct RequestQueue<T> {
    tiers: [PriorityTier<T>; 3],
    index: HashMap<RequestId, (Priority, TenantId)>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self {
            tiers: [
                PriorityTier::default(),
                PriorityTier::default(),
                PriorityTier::default(),
            ],
            index: HashMap::new(),
        }
    }
}

impl<T> RequestQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, priority: Priority) -> &PriorityTier<T> {
        &self.tiers[Self::tier_index(priority)]
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut PriorityTier<T> {
        &mut self.tiers[Self::tier_index(priority)]
    }

    fn tier_index(priority: Priority) -> usize {
        match priority {
            Priority::P0 => 0,
            Priority::P1 => 1,
            Priority::P2 => 2,
        }
    }

    /// Adds a request to its tenant's bucket within its priority tier. If
    /// the tenant had no pending requests at this priority, it joins the
    /// back of that tier's round-robin ring.
    pub fn enqueue(&mut self, id: RequestId, tenant_id: impl Into<String>, priority: Priority, payload: T) {
        let tenant_id = tenant_id.into();
        self.index.insert(id, (priority, tenant_id.clone()));
        self.tier_mut(priority).push(tenant_id, id, payload);
    }

    /// Requeues a request at the front of its tenant's bucket, e.g. after a
    /// retriable failure. Does not change the tenant's ring position, so it
    /// does not jump ahead of other tenants.
    pub fn enqueue_front(&mut self, id: RequestId, tenant_id: impl Into<String>, priority: Priority, payload: T) {
        let tenant_id = tenant_id.into();
        self.index.insert(id, (priority, tenant_id.clone()));
        self.tier_mut(priority).push_front(tenant_id, id, payload);
    }

    /// Reads a still-queued request's payload without removing it, so the
    /// dispatcher can inspect a candidate (its deadline, route key) before
    /// deciding whether to admit it.
    pub fn get(&self, id: RequestId) -> Option<&T> {
        let (priority, tenant_id) = self.index.get(&id)?;
        self.tier(*priority).get(tenant_id, id)
    }

    /// Returns candidate request ids in dispatch order: every P0 tenant's
    /// head request, then every P1 tenant's head request, then every P2
    /// tenant's head request, each tier in its current round-robin order.
    ///
    /// This does not remove or reorder anything; it is a read of "what
    /// would be tried next" for a single scheduling tick. The dispatcher
    /// calls [`RequestQueue::remove`] on whichever candidate it actually
    /// admits, which is what advances that tenant's turn.
    pub fn select_candidates(&self) -> Vec<RequestId> {
        Priority::ALL
            .iter()
            .flat_map(|&p| self.tier(p).candidates())
            .collect()
    }

    /// Removes a specific request from the queue, wherever it sits,
    /// returning its payload. Used both when the dispatcher admits a
    /// request and when a caller cancels one still waiting.
    pub fn remove(&mut self, id: RequestId) -> Option<T> {
        let (priority, tenant_id) = self.index.remove(&id)?;
        self.tier_mut(priority).remove(&tenant_id, id)
    }

    /// Total number of requests waiting across all priorities.
    pub fn len(&self) -> usize {
        self.tiers.iter().map(PriorityTier::len).sum()
    }

    /// `true` if no requests are waiting.
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(PriorityTier::is_empty)
    }
}
