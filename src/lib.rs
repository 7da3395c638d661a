//! Task-dispatch core of a distributed workflow-orchestration engine.
//!
//! Given an ordered batch of queued step runs plus the current worker slot
//! inventory, worker labels, step affinity requirements, and rate limit
//! state, [`Scheduler::generate_plan`] produces a [`SchedulePlan`] describing
//! every per-item outcome (assigned, unassigned, timed out, rate limited)
//! for the caller to persist and act on transactionally.
//!
//! A pass is synchronous and owns all of its state: there is no I/O, no
//! cancellation, and no shared mutable state between tenants except the
//! [`rate_limit::ExhaustedLimitCache`], which is explicitly injected and
//! safe for concurrent access.

pub mod item;
pub mod labels;
pub mod plan;
pub mod rate_limit;
pub mod scheduler;
pub mod settings;
pub mod trace;
pub mod worker_state;

pub use item::{QueuedItem, StickyStrategy};
pub use plan::{AssignedItem, RateLimitedItem, SchedulePlan};
pub use scheduler::{PlanInput, Scheduler};
pub use worker_state::Slot;

/// Current wall-clock time as epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
