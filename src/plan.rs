//! The schedule plan: every per-item outcome of one pass, returned by value
//! for the caller to apply transactionally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A successful assignment of a step run to a worker slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedItem {
    pub step_run_id: String,
    pub worker_id: String,
    pub dispatcher_id: String,
    pub slot_id: String,
    /// Execution timeout propagated from the queued item.
    pub execution_timeout_ms: i64,
}

/// A step run blocked by an exhausted rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitedItem {
    pub step_run_id: String,
    /// The first key whose budget rejected the step run.
    pub key: String,
}

/// Output of one plan-generation pass.
///
/// Every queued item appears in exactly one of the assigned, unassigned,
/// timed-out, or rate-limited buckets. An item's queue-position id appears
/// in `consumed_queue_item_ids` only when assigned or timed out; unassigned
/// and rate-limited items remain queued for a future pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulePlan {
    pub assigned: Vec<AssignedItem>,
    pub unassigned_step_run_ids: Vec<String>,
    pub timed_out_step_run_ids: Vec<String>,
    pub rate_limited: Vec<RateLimitedItem>,
    /// Queue-position ids the caller must durably mark as no longer pending.
    pub consumed_queue_item_ids: Vec<i64>,
    /// Lowest queue-position id among top-tier items seen this pass, per
    /// queue; used by the caller to detect scheduling gaps.
    pub min_queued_ids: HashMap<String, i64>,
    /// Net units consumed per rate limit key, after all rollbacks.
    pub rate_limit_units_consumed: HashMap<String, i32>,
    /// When true the caller should re-invoke the generator immediately
    /// rather than waiting for the next polling interval.
    pub should_continue: bool,
}

impl SchedulePlan {
    /// Total number of items that received an outcome this pass.
    pub fn outcome_count(&self) -> usize {
        self.assigned.len()
            + self.unassigned_step_run_ids.len()
            + self.timed_out_step_run_ids.len()
            + self.rate_limited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcome_count() == 0
    }

    /// Track the smallest still-outstanding queue-position id per queue.
    pub(crate) fn observe_min_queued(&mut self, queue: &str, id: i64) {
        self.min_queued_ids
            .entry(queue.to_string())
            .and_modify(|min| *min = (*min).min(id))
            .or_insert(id);
    }
}
