//! Per-worker slot tracking and the sticky/affinity/default placement
//! strategy.
//!
//! Slots are pass-scoped: the manager takes ownership of the inventory at
//! construction and removes slots as they are assigned. A worker emptied by
//! an assignment is dropped from the eligible set immediately; affinity
//! rankings are precomputed once and never re-sorted mid-pass, so entries
//! referencing a dropped worker are simply skipped on the next lookup.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::item::{QueuedItem, StickyStrategy};
use crate::labels::{compute_affinity_weight, AffinityWeight, DesiredLabel, WorkerLabel};

/// One unit of concurrent execution capacity, scoped to exactly one
/// (worker, dispatcher, action) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub worker_id: String,
    pub dispatcher_id: String,
    pub action_id: String,
}

/// A precomputed (worker, weight) ranking entry for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedWorker {
    pub worker_id: String,
    pub weight: i32,
}

/// A single worker's remaining slots, labels, and serveable actions.
#[derive(Debug)]
pub struct WorkerStateTracker {
    worker_id: String,
    slots: Vec<Slot>,
    actions: HashSet<String>,
    labels: Vec<WorkerLabel>,
}

impl WorkerStateTracker {
    fn new(worker_id: String, labels: Vec<WorkerLabel>) -> Self {
        Self {
            worker_id,
            slots: Vec::new(),
            actions: HashSet::new(),
            labels,
        }
    }

    fn add_slot(&mut self, slot: Slot) {
        self.actions.insert(slot.action_id.clone());
        self.slots.push(slot);
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn labels(&self) -> &[WorkerLabel] {
        &self.labels
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether the worker currently holds a slot for this action.
    pub fn can_serve(&self, action_id: &str) -> bool {
        self.actions.contains(action_id)
    }

    /// Remove and return one slot usable for `action_id`.
    ///
    /// Fails without side effects when no usable slot remains. The second
    /// tuple element is true when this assignment emptied the worker, which
    /// signals the caller to drop it from further consideration in the pass.
    pub fn assign_slot(&mut self, action_id: &str) -> Option<(Slot, bool)> {
        let pos = self.slots.iter().position(|s| s.action_id == action_id)?;
        let slot = self.slots.remove(pos);

        if !self.slots.iter().any(|s| s.action_id == action_id) {
            self.actions.remove(action_id);
        }
        Some((slot, self.slots.is_empty()))
    }
}

/// Composes all worker trackers for one pass and resolves placement.
pub struct WorkerStateManager {
    workers: HashMap<String, WorkerStateTracker>,
    // step id -> eligible workers sorted by descending affinity weight
    step_rankings: HashMap<String, Vec<RankedWorker>>,
}

impl WorkerStateManager {
    /// Build one tracker per worker from the slot inventory and, where
    /// affinity data exists, precompute a weight-sorted worker ranking per
    /// step. Workers scoring ineligible are excluded from the ranking.
    pub fn new(
        slots: Vec<Slot>,
        worker_labels: &HashMap<String, Vec<WorkerLabel>>,
        step_desired_labels: &HashMap<String, Vec<DesiredLabel>>,
    ) -> Self {
        let mut workers: HashMap<String, WorkerStateTracker> = HashMap::new();
        for slot in slots {
            let tracker = workers.entry(slot.worker_id.clone()).or_insert_with(|| {
                let labels = worker_labels
                    .get(&slot.worker_id)
                    .cloned()
                    .unwrap_or_default();
                WorkerStateTracker::new(slot.worker_id.clone(), labels)
            });
            tracker.add_slot(slot);
        }

        let mut step_rankings: HashMap<String, Vec<RankedWorker>> = HashMap::new();
        for (step_id, desired) in step_desired_labels {
            if desired.is_empty() {
                continue;
            }
            let mut ranked: Vec<RankedWorker> = Vec::new();
            for tracker in workers.values() {
                match compute_affinity_weight(desired, tracker.labels()) {
                    AffinityWeight::Ineligible => continue,
                    AffinityWeight::Score(weight) => ranked.push(RankedWorker {
                        worker_id: tracker.worker_id.clone(),
                        weight,
                    }),
                }
            }
            // Descending weight; ties broken by worker id for determinism
            ranked.sort_by(|a, b| {
                b.weight
                    .cmp(&a.weight)
                    .then_with(|| a.worker_id.cmp(&b.worker_id))
            });
            step_rankings.insert(step_id.clone(), ranked);
        }

        Self {
            workers,
            step_rankings,
        }
    }

    /// Fast worker-existence check: a non-empty affinity ranking exists for
    /// the step, or, when the step has no affinity data, any worker remains.
    /// Does not guarantee a matching action id.
    pub fn has_eligible_workers(&self, step_id: &str) -> bool {
        match self.step_rankings.get(step_id) {
            Some(ranked) => !ranked.is_empty(),
            None => !self.workers.is_empty(),
        }
    }

    pub fn remaining_worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn remaining_slot_count(&self) -> usize {
        self.workers.values().map(|t| t.slot_count()).sum()
    }

    /// Whether any remaining worker still holds a slot for this action.
    pub fn any_worker_can_serve(&self, action_id: &str) -> bool {
        self.workers.values().any(|t| t.can_serve(action_id))
    }

    /// Resolve placement for a queued item and claim one slot.
    ///
    /// Strategy priority: hard stickiness (desired worker or nothing), soft
    /// stickiness (desired worker first, then fall through), affinity
    /// ranking in descending weight order, and finally any remaining worker.
    /// When a ranking exists, workers outside it scored ineligible and are
    /// never tried.
    pub fn attempt_assign_slot(&mut self, item: &QueuedItem) -> Option<Slot> {
        match item.sticky {
            StickyStrategy::Hard => {
                if let Some(desired) = item.desired_worker_id.clone() {
                    // Never fall back to another worker
                    return self.try_assign(&desired, &item.action_id);
                }
                // No binding recorded yet (first run); place anywhere below
            }
            StickyStrategy::Soft => {
                if let Some(desired) = item.desired_worker_id.clone() {
                    if let Some(slot) = self.try_assign(&desired, &item.action_id) {
                        return Some(slot);
                    }
                }
            }
            StickyStrategy::None => {}
        }

        if let Some(ranked) = self.step_rankings.get(&item.step_id) {
            let order: Vec<String> = ranked.iter().map(|r| r.worker_id.clone()).collect();
            for worker_id in order {
                // Entries for workers dropped mid-pass are skipped here
                if let Some(slot) = self.try_assign(&worker_id, &item.action_id) {
                    return Some(slot);
                }
            }
            return None;
        }

        let candidates: Vec<String> = self.workers.keys().cloned().collect();
        for worker_id in candidates {
            if let Some(slot) = self.try_assign(&worker_id, &item.action_id) {
                return Some(slot);
            }
        }
        None
    }

    fn try_assign(&mut self, worker_id: &str, action_id: &str) -> Option<Slot> {
        let tracker = self.workers.get_mut(worker_id)?;
        let (slot, emptied) = tracker.assign_slot(action_id)?;
        if emptied {
            self.workers.remove(worker_id);
            debug!(worker_id = %slot.worker_id, "worker out of slots, dropped from pass");
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: &str, worker: &str, action: &str) -> Slot {
        Slot {
            id: id.to_string(),
            worker_id: worker.to_string(),
            dispatcher_id: "dispatcher-1".to_string(),
            action_id: action.to_string(),
        }
    }

    #[test]
    fn tracker_assign_pops_matching_slot_only() {
        let mut tracker = WorkerStateTracker::new("w1".to_string(), vec![]);
        tracker.add_slot(slot("s1", "w1", "send-email"));
        tracker.add_slot(slot("s2", "w1", "resize-image"));

        assert!(tracker.assign_slot("no-such-action").is_none());
        assert_eq!(tracker.slot_count(), 2);

        let (got, emptied) = tracker.assign_slot("send-email").unwrap();
        assert_eq!(got.id, "s1");
        assert!(!emptied);
        assert!(!tracker.can_serve("send-email"));
        assert!(tracker.can_serve("resize-image"));

        let (_, emptied) = tracker.assign_slot("resize-image").unwrap();
        assert!(emptied);
    }

    #[test]
    fn manager_drops_emptied_worker() {
        let mut manager = WorkerStateManager::new(
            vec![slot("s1", "w1", "send-email")],
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(manager.remaining_worker_count(), 1);

        let got = manager.try_assign("w1", "send-email");
        assert!(got.is_some());
        assert_eq!(manager.remaining_worker_count(), 0);
        assert!(!manager.has_eligible_workers("any-step"));
    }
}
