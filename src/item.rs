//! Queued item types consumed by the plan generator.
//!
//! A queued item is constructed upstream from durable storage before a pass
//! and is immutable for the duration of the pass. It is consumed (removed
//! from future consideration) only if the plan marks it assigned or timed
//! out; unassigned and rate-limited items stay queued for a later pass.

use serde::{Deserialize, Serialize};

/// Priority tier tracked by the plan's per-queue minimum-queued-id mapping.
pub const TOP_PRIORITY_TIER: u8 = 1;

/// Placement preference binding a step run to a previously-used worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickyStrategy {
    /// No placement preference.
    #[default]
    None,
    /// Prefer the desired worker but fall back to any eligible one.
    Soft,
    /// Only the desired worker may be used; never fall back.
    Hard,
}

/// One unit of queued work awaiting assignment to a worker slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedItem {
    /// Queue-position id. Ordering is meaningful and doubles as the commit
    /// marker the caller uses to mark the item consumed.
    pub id: i64,
    pub step_run_id: String,
    /// Key into the step's desired-label requirements, when any exist.
    pub step_id: String,
    /// Capability a worker must declare to serve this item.
    pub action_id: String,
    pub queue: String,
    /// 1 is the top tier.
    pub priority: u8,
    /// Deadline by which the item must have been assigned. Items past it are
    /// classified timed out, not errored.
    pub schedule_timeout_at_ms: Option<i64>,
    pub sticky: StickyStrategy,
    pub desired_worker_id: Option<String>,
    /// Execution timeout propagated to the worker on assignment.
    pub execution_timeout_ms: i64,
}

impl QueuedItem {
    /// Whether the schedule timeout is set and already elapsed.
    pub fn is_timed_out(&self, now_ms: i64) -> bool {
        matches!(self.schedule_timeout_at_ms, Some(at) if at < now_ms)
    }
}
