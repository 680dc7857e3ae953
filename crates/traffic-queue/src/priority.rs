/// Request priority tier. Lower numeric rank drains first: every `P0`
/// request is offered to the dispatcher before any `P1`, and every `P1`
/// before any `P2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// Highest priority: interactive, latency-sensitive calls.
    P0,
    /// Default priority for ordinary agent work.
    P1,
    /// Background/batch priority, dispatched only once P0 and P1 are empty.
    P2,
}

impl Priority {
    /// All priority tiers, highest first.
    pub const ALL: [Priority; 3] = [Priority::P0, Priority::P1, Priority::P2];
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P1
    }
}
