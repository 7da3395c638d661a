//! The plan generator: one synchronous pass over an ordered sequence of
//! queued items.
//!
//! Per-item outcomes are resolved in a fixed order, first match wins:
//!
//! 1. schedule timeout elapsed (checked before capacity so stale items are
//!    retired even with no capacity pressure),
//! 2. no eligible worker for the step,
//! 3. rate limit consumption (every required key is attempted so the
//!    rollback below covers all of them),
//! 4. slot assignment.
//!
//! Whenever an item ends rate-limited or unassigned, every rate limit key it
//! touched is rolled back so no capacity leaks to later items in the pass.
//! The generator itself never fails: malformed auxiliary data (a rate limit
//! requirement with no matching key, a step with no affinity data) is
//! treated as "no constraint".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::item::{QueuedItem, TOP_PRIORITY_TIER};
use crate::labels::{DesiredLabel, WorkerLabel};
use crate::plan::{AssignedItem, RateLimitedItem, SchedulePlan};
use crate::rate_limit::{ExhaustedLimitCache, RateLimitSet, RateLimitSnapshot};
use crate::worker_state::{Slot, WorkerStateManager};

/// Everything one pass needs, supplied by the queue/storage collaborator.
/// The generator takes ownership; nothing here is shared with other passes.
#[derive(Debug, Default)]
pub struct PlanInput {
    /// Ordered queued items. Ordering is the tie-break and fairness
    /// mechanism and is preserved verbatim.
    pub items: Vec<QueuedItem>,
    /// Current slot inventory across all workers.
    pub slots: Vec<Slot>,
    /// worker id -> labels
    pub worker_labels: HashMap<String, Vec<WorkerLabel>>,
    /// step id -> desired labels, for steps with affinity requirements
    pub step_desired_labels: HashMap<String, Vec<DesiredLabel>>,
    /// Current per-tenant rate limit state.
    pub rate_limits: Vec<RateLimitSnapshot>,
    /// step run id -> (rate limit key -> units required)
    pub step_run_rate_units: HashMap<String, HashMap<String, i32>>,
}

/// Per-tenant plan generator.
///
/// Tenants are scheduled independently; the caller guarantees mutual
/// exclusion per tenant (leadership is an external concern). The only state
/// carried across passes is the injected [`ExhaustedLimitCache`].
pub struct Scheduler {
    tenant_id: String,
    exhausted_cache: Arc<ExhaustedLimitCache>,
}

impl Scheduler {
    pub fn new(tenant_id: impl Into<String>, exhausted_cache: Arc<ExhaustedLimitCache>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            exhausted_cache,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Run one assignment pass and return the resulting plan.
    ///
    /// Linear in the number of queued items plus workers. No externally
    /// observable side effects until the caller applies the plan, except
    /// exhausted-limit cache entries recorded for rate-limited queues.
    pub fn generate_plan(&self, input: PlanInput, now_ms: i64) -> SchedulePlan {
        let mut workers =
            WorkerStateManager::new(input.slots, &input.worker_labels, &input.step_desired_labels);
        let mut limits = RateLimitSet::new(input.rate_limits);
        let mut plan = SchedulePlan::default();

        // Per-queue bookkeeping for the drain/continuation heuristic
        let mut queue_remaining: HashMap<&str, usize> = HashMap::new();
        let mut queue_actions: HashMap<&str, HashSet<&str>> = HashMap::new();
        for item in &input.items {
            *queue_remaining.entry(item.queue.as_str()).or_default() += 1;
            queue_actions
                .entry(item.queue.as_str())
                .or_default()
                .insert(item.action_id.as_str());
        }
        let mut drained: HashSet<&str> = HashSet::new();

        for item in &input.items {
            if item.is_timed_out(now_ms) {
                debug!(
                    tenant = %self.tenant_id,
                    step_run_id = %item.step_run_id,
                    queue = %item.queue,
                    "schedule timeout elapsed, retiring item"
                );
                plan.timed_out_step_run_ids.push(item.step_run_id.clone());
                plan.consumed_queue_item_ids.push(item.id);
                continue;
            }

            if item.priority == TOP_PRIORITY_TIER {
                plan.observe_min_queued(&item.queue, item.id);
            }

            if !workers.has_eligible_workers(&item.step_id) {
                debug!(
                    tenant = %self.tenant_id,
                    step_run_id = %item.step_run_id,
                    step_id = %item.step_id,
                    "no eligible worker"
                );
                plan.unassigned_step_run_ids.push(item.step_run_id.clone());
                continue;
            }

            // Speculatively consume every required key, remembering the
            // first that rejects. Attempting the rest keeps the touched set
            // complete for the rollback below.
            let mut exceeded: Option<String> = None;
            if let Some(required) = input.step_run_rate_units.get(&item.step_run_id) {
                for (key, units) in required {
                    if !limits.try_consume(&item.step_run_id, key, *units) && exceeded.is_none() {
                        exceeded = Some(key.clone());
                    }
                }
            }

            if let Some(key) = exceeded {
                limits.rollback_step_run(&item.step_run_id);
                self.exhausted_cache.set_exhausted(
                    &self.tenant_id,
                    &item.queue,
                    limits.next_refill_at_ms(&key),
                    now_ms,
                );
                plan.rate_limited.push(RateLimitedItem {
                    step_run_id: item.step_run_id.clone(),
                    key,
                });
                continue;
            }

            match workers.attempt_assign_slot(item) {
                Some(slot) => {
                    plan.assigned.push(AssignedItem {
                        step_run_id: item.step_run_id.clone(),
                        worker_id: slot.worker_id,
                        dispatcher_id: slot.dispatcher_id,
                        slot_id: slot.id,
                        execution_timeout_ms: item.execution_timeout_ms,
                    });
                    plan.consumed_queue_item_ids.push(item.id);

                    if let Some(count) = queue_remaining.get_mut(item.queue.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            drained.insert(item.queue.as_str());
                        }
                    }
                }
                None => {
                    // Eligible on paper, but no worker could actually serve
                    // it. Return the touched rate limit capacity.
                    limits.rollback_step_run(&item.step_run_id);
                    plan.unassigned_step_run_ids.push(item.step_run_id.clone());
                }
            }
        }

        // All rollbacks are done; the snapshot is now safe to take.
        plan.rate_limit_units_consumed = limits.consumed_snapshot();

        // A queue drained this pass while a remaining worker can still serve
        // its action means more work may be schedulable right now; re-invoke
        // rather than waiting out the polling interval.
        plan.should_continue = drained.iter().any(|queue| {
            queue_actions
                .get(queue)
                .is_some_and(|actions| actions.iter().any(|a| workers.any_worker_can_serve(a)))
        });

        debug!(
            tenant = %self.tenant_id,
            assigned = plan.assigned.len(),
            unassigned = plan.unassigned_step_run_ids.len(),
            timed_out = plan.timed_out_step_run_ids.len(),
            rate_limited = plan.rate_limited.len(),
            should_continue = plan.should_continue,
            "generated schedule plan"
        );

        plan
    }
}
