//! Fallback chain table and fallback policy table.

use std::collections::HashMap;

use traffic_core::events::{EventListeners, FnListener};

use crate::events::FallbackEvent;

/// How a resolved policy handles an open circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Switch to the next eligible target in the route key's fallback chain.
    Fallback,
    /// Remain queued until the circuit's probe instant and retry the same
    /// route key rather than switching targets.
    Wait,
}

/// Maps a route key (or bare model key) to its ordered list of fallback
/// targets.
///
/// Resolution prefers an exact `provider::model` match over a bare `model`
/// match, per [`FallbackChains::resolve`].
pub struct FallbackChains {
    chains: HashMap<String, Vec<String>>,
    event_listeners: EventListeners<FallbackEvent>,
}

impl FallbackChains {
    /// Creates a new builder.
    pub fn builder() -> FallbackChainsBuilder {
        FallbackChainsBuilder::new()
    }

    /// Resolves the ordered fallback targets for `route_key`, falling back
    /// to a lookup by bare `model` if no route-key-specific chain exists.
    pub fn resolve(&self, route_key: &str, model: &str) -> &[String] {
        self.chains
            .get(route_key)
            .or_else(|| self.chains.get(model))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Emits an event through this table's listeners.
    pub fn emit(&self, event: &FallbackEvent) {
        self.event_listeners.emit(event);
    }
}

/// Builder for [`FallbackChains`].
pub struct FallbackChainsBuilder {
    chains: HashMap<String, Vec<String>>,
    event_listeners: EventListeners<FallbackEvent>,
}

impl FallbackChainsBuilder {
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Registers the fallback chain for a key (a route key or bare model).
    pub fn chain(mut self, key: impl Into<String>, targets: Vec<String>) -> Self {
        self.chains.insert(key.into(), targets);
        self
    }

    /// Registers an event listener.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&FallbackEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> FallbackChains {
        FallbackChains {
            chains: self.chains,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for FallbackChainsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves which [`PolicyMode`] governs a request, by precedence:
/// the request's own `fallback_policy_id`, then a task-type default, then
/// the table-wide default, then an implicit `Fallback`.
pub struct FallbackPolicyTable {
    default_policy_id: Option<String>,
    task_type_policy_ids: HashMap<String, String>,
    policies: HashMap<String, PolicyMode>,
}

impl FallbackPolicyTable {
    /// Creates a new builder.
    pub fn builder() -> FallbackPolicyTableBuilder {
        FallbackPolicyTableBuilder::new()
    }

    /// Resolves the policy mode for a request.
    ///
    /// `fallback_policy_id` is the request's own explicit policy reference,
    /// if any; `task_type` is its task type, used to look up a per-task-type
    /// default when the request didn't name a policy.
    pub fn resolve(&self, fallback_policy_id: Option<&str>, task_type: &str) -> PolicyMode {
        let policy_id = fallback_policy_id
            .map(str::to_string)
            .or_else(|| self.task_type_policy_ids.get(task_type).cloned())
            .or_else(|| self.default_policy_id.clone());

        policy_id
            .and_then(|id| self.policies.get(&id).copied())
            .unwrap_or(PolicyMode::Fallback)
    }
}

/// Builder for [`FallbackPolicyTable`].
pub struct FallbackPolicyTableBuilder {
    default_policy_id: Option<String>,
    task_type_policy_ids: HashMap<String, String>,
    policies: HashMap<String, PolicyMode>,
}

impl FallbackPolicyTableBuilder {
    pub fn new() -> Self {
        Self {
            default_policy_id: None,
            task_type_policy_ids: HashMap::new(),
            policies: HashMap::new(),
        }
    }

    /// Sets the policy id used when no more specific match applies.
    pub fn default_policy_id(mut self, id: impl Into<String>) -> Self {
        self.default_policy_id = Some(id.into());
        self
    }

    /// Associates a task type with a policy id.
    pub fn task_type_policy_id(mut self, task_type: impl Into<String>, id: impl Into<String>) -> Self {
        self.task_type_policy_ids.insert(task_type.into(), id.into());
        self
    }

    /// Registers a named policy's mode.
    pub fn policy(mut self, id: impl Into<String>, mode: PolicyMode) -> Self {
        self.policies.insert(id.into(), mode);
        self
    }

    pub fn build(self) -> FallbackPolicyTable {
        FallbackPolicyTable {
            default_policy_id: self.default_policy_id,
            task_type_policy_ids: self.task_type_policy_ids,
            policies: self.policies,
        }
    }
}

impl Default for FallbackPolicyTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
