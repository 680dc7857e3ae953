//! Priority-ordered, tenant-fair request queue.
//!
//! Requests are grouped first by [`Priority`] (P0 drains fully before P1,
//! which drains fully before P2) and, within a priority, round-robined
//! across tenants so one noisy tenant cannot starve the others at the same
//! priority tier. The queue itself holds no upstream-call semantics: it
//! only decides *which* pending requests the dispatcher should try next.

mod priority;
mod queue;

pub use priority::Priority;
pub use queue::{RequestId, RequestQueue};
