//! Tests for the worker state manager: eligibility checks, slot accounting,
//! and placement strategy resolution.


use std::collections::HashMap;

use derrick::labels::{DesiredLabel, LabelComparator, LabelValue, WorkerLabel};
use derrick::worker_state::WorkerStateManager;

use test_helpers::{item, slot};

fn no_labels() -> HashMap<String, Vec<WorkerLabel>> {
    HashMap::new()
}

fn no_affinity() -> HashMap<String, Vec<DesiredLabel>> {
    HashMap::new()
}

#[test]
fn eligibility_without_affinity_data_is_worker_existence() {
    let manager = WorkerStateManager::new(
        vec![slot("s1", "w1", "send-email")],
        &no_labels(),
        &no_affinity(),
    );
    assert!(manager.has_eligible_workers("unknown-step"));

    let empty = WorkerStateManager::new(vec![], &no_labels(), &no_affinity());
    assert!(!empty.has_eligible_workers("unknown-step"));
}

#[test]
fn eligibility_with_affinity_data_requires_a_ranked_worker() {
    let desired = vec![DesiredLabel {
        key: "region".to_string(),
        comparator: LabelComparator::Equal,
        value: LabelValue::Str("eu".to_string()),
        weight: 1,
        required: true,
    }];
    let manager = WorkerStateManager::new(
        vec![slot("s1", "w1", "send-email")],
        &no_labels(),
        &HashMap::from([("step-a".to_string(), desired)]),
    );

    // the only worker is ineligible for step-a, but steps without affinity
    // data still see it
    assert!(!manager.has_eligible_workers("step-a"));
    assert!(manager.has_eligible_workers("step-without-affinity"));
}

#[test]
fn assignment_consumes_slots_and_drops_empty_workers() {
    let mut manager = WorkerStateManager::new(
        vec![
            slot("s1", "w1", "send-email"),
            slot("s2", "w1", "send-email"),
        ],
        &no_labels(),
        &no_affinity(),
    );
    let it = item(1, "run-1", "send-email", "default");

    assert_eq!(manager.remaining_slot_count(), 2);
    assert!(manager.attempt_assign_slot(&it).is_some());
    assert_eq!(manager.remaining_slot_count(), 1);
    assert_eq!(manager.remaining_worker_count(), 1);

    assert!(manager.attempt_assign_slot(&it).is_some());
    assert_eq!(manager.remaining_worker_count(), 0);
    assert!(manager.attempt_assign_slot(&it).is_none());
}

#[test]
fn action_mismatch_fails_without_side_effects() {
    let mut manager = WorkerStateManager::new(
        vec![slot("s1", "w1", "send-email")],
        &no_labels(),
        &no_affinity(),
    );
    let it = item(1, "run-1", "resize-image", "default");

    assert!(manager.attempt_assign_slot(&it).is_none());
    assert_eq!(manager.remaining_slot_count(), 1);
    assert_eq!(manager.remaining_worker_count(), 1);
}

#[test]
fn ranking_skips_workers_dropped_mid_pass() {
    let desired = vec![DesiredLabel {
        key: "speed".to_string(),
        comparator: LabelComparator::GreaterThanOrEqual,
        value: LabelValue::Int(1),
        weight: 1,
        required: false,
    }];
    let labels = HashMap::from([
        (
            "w-fast".to_string(),
            vec![WorkerLabel {
                key: "speed".to_string(),
                value: LabelValue::Int(10),
            }],
        ),
        (
            "w-slow".to_string(),
            vec![WorkerLabel {
                key: "speed".to_string(),
                value: LabelValue::Int(1),
            }],
        ),
    ]);
    let mut manager = WorkerStateManager::new(
        vec![
            slot("s1", "w-fast", "send-email"),
            slot("s2", "w-slow", "send-email"),
        ],
        &labels,
        &HashMap::from([("step-a".to_string(), desired)]),
    );

    let mut it = item(1, "run-1", "send-email", "default");
    it.step_id = "step-a".to_string();

    // both rank equally here; first assignment empties one worker, the next
    // lookup skips the stale ranking entry and uses the survivor
    let first = manager.attempt_assign_slot(&it).unwrap();
    let second = manager.attempt_assign_slot(&it).unwrap();
    assert_ne!(first.worker_id, second.worker_id);
    assert!(manager.attempt_assign_slot(&it).is_none());
}

#[test]
fn any_worker_can_serve_reflects_remaining_slots() {
    let mut manager = WorkerStateManager::new(
        vec![
            slot("s1", "w1", "send-email"),
            slot("s2", "w1", "resize-image"),
        ],
        &no_labels(),
        &no_affinity(),
    );

    assert!(manager.any_worker_can_serve("send-email"));
    let it = item(1, "run-1", "send-email", "default");
    manager.attempt_assign_slot(&it).unwrap();
    assert!(!manager.any_worker_can_serve("send-email"));
    assert!(manager.any_worker_can_serve("resize-image"));
}
