//! Per-key rate limit consumption with speculative add and rollback.
//!
//! A [`RateLimit`] tracks how many units each step run has speculatively
//! consumed within the current pass so that exactly that step run's
//! contribution can be rolled back without affecting others. Because one
//! queued item may need units from several independent keys, the plan
//! generator is responsible for rolling back *every* key a step run touched
//! whenever any of them rejects it, or when the item fails to obtain a slot
//! for an unrelated reason. Failing to do so leaks consumed capacity for the
//! remainder of the pass.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Durable rate limit state supplied by the caller at the start of a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub key: String,
    pub max_units: i32,
    /// Informational; the refill itself is the caller's bookkeeping.
    pub next_refill_at_ms: i64,
}

/// Pass-scoped consumption state for one rate limit key.
#[derive(Debug, Clone)]
pub struct RateLimit {
    key: String,
    max_units: i32,
    consumed_units: i32,
    next_refill_at_ms: i64,
    step_run_units: HashMap<String, i32>,
}

impl RateLimit {
    pub fn new(key: impl Into<String>, max_units: i32, next_refill_at_ms: i64) -> Self {
        Self {
            key: key.into(),
            max_units,
            consumed_units: 0,
            next_refill_at_ms,
            step_run_units: HashMap::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn consumed_units(&self) -> i32 {
        self.consumed_units
    }

    pub fn next_refill_at_ms(&self) -> i64 {
        self.next_refill_at_ms
    }

    /// Speculatively consume `units` on behalf of a step run.
    ///
    /// If the running total would exceed the budget, this key's contribution
    /// for the step run is rolled back immediately and `false` is returned.
    pub fn add_step_run(&mut self, step_run_id: &str, units: i32) -> bool {
        self.consumed_units += units;
        self.step_run_units.insert(step_run_id.to_string(), units);

        if self.consumed_units > self.max_units {
            self.rollback(step_run_id);
            return false;
        }
        true
    }

    /// Remove the step run's recorded units from the running total.
    /// Idempotent for step runs that never consumed from this key.
    pub fn rollback(&mut self, step_run_id: &str) {
        if let Some(units) = self.step_run_units.remove(step_run_id) {
            self.consumed_units -= units;
        }
    }
}

/// All rate limits visible to a single plan-generation pass.
#[derive(Debug, Default)]
pub struct RateLimitSet {
    limits: HashMap<String, RateLimit>,
}

impl RateLimitSet {
    pub fn new(snapshots: Vec<RateLimitSnapshot>) -> Self {
        let mut limits = HashMap::with_capacity(snapshots.len());
        for snap in snapshots {
            limits.insert(
                snap.key.clone(),
                RateLimit::new(snap.key, snap.max_units, snap.next_refill_at_ms),
            );
        }
        Self { limits }
    }

    /// Attempt speculative consumption against one key.
    ///
    /// A requirement referencing an unknown key is treated as "no such
    /// limit": no consumption and no blocking.
    pub fn try_consume(&mut self, step_run_id: &str, key: &str, units: i32) -> bool {
        match self.limits.get_mut(key) {
            Some(limit) => {
                let ok = limit.add_step_run(step_run_id, units);
                if !ok {
                    debug!(
                        step_run_id = %step_run_id,
                        key = %key,
                        units,
                        consumed = limit.consumed_units(),
                        max = limit.max_units,
                        "rate limit exhausted"
                    );
                }
                ok
            }
            None => true,
        }
    }

    /// Roll back the step run's contribution on every key it touched.
    pub fn rollback_step_run(&mut self, step_run_id: &str) {
        for limit in self.limits.values_mut() {
            limit.rollback(step_run_id);
        }
    }

    pub fn next_refill_at_ms(&self, key: &str) -> Option<i64> {
        self.limits.get(key).map(|l| l.next_refill_at_ms())
    }

    /// Final per-key consumed-units snapshot for the caller's refill
    /// bookkeeping. Must be taken after all rollbacks have run.
    pub fn consumed_snapshot(&self) -> HashMap<String, i32> {
        self.limits
            .iter()
            .map(|(key, limit)| (key.clone(), limit.consumed_units()))
            .collect()
    }
}

/// Cross-pass cache of (tenant, queue) pairs whose rate limits are known to
/// be exhausted, letting a caller skip them without consulting durable
/// storage.
///
/// Entries are independent and keyed by a `tenant|queue` composite, so the
/// cache is safe for concurrent use by schedulers of different tenants.
pub struct ExhaustedLimitCache {
    // "<tenant>|<queue>" -> exhausted-until epoch ms
    entries: Mutex<HashMap<String, i64>>,
    max_cache_ms: i64,
}

impl ExhaustedLimitCache {
    /// `max_cache_ms` bounds how long an entry may live, so a missing true
    /// refill time never causes an unbounded skip.
    pub fn new(max_cache_ms: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_cache_ms,
        }
    }

    fn composite_key(tenant: &str, queue: &str) -> String {
        format!("{}|{}", tenant, queue)
    }

    /// Record that one of the queue's rate limits is exhausted until
    /// `next_refill_at_ms` (clamped to the max cache duration). The cache
    /// keeps the earliest refill instant among the queue's exhausted limits.
    pub fn set_exhausted(
        &self,
        tenant: &str,
        queue: &str,
        next_refill_at_ms: Option<i64>,
        now_ms: i64,
    ) {
        let cap = now_ms + self.max_cache_ms;
        let until = next_refill_at_ms.map_or(cap, |at| at.min(cap));
        if until <= now_ms {
            return;
        }

        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(Self::composite_key(tenant, queue))
            .and_modify(|existing| *existing = (*existing).min(until))
            .or_insert(until);
    }

    /// True only while the recorded refill instant is still in the future.
    /// Expired entries are evicted on lookup.
    pub fn is_exhausted(&self, tenant: &str, queue: &str, now_ms: i64) -> bool {
        let key = Self::composite_key(tenant, queue);
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&key) {
            Some(&until) if until > now_ms => true,
            Some(_) => {
                entries.remove(&key);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_within_budget_succeeds() {
        let mut limit = RateLimit::new("k", 10, 0);
        assert!(limit.add_step_run("run-1", 6));
        assert_eq!(limit.consumed_units(), 6);
    }

    #[test]
    fn add_over_budget_self_rolls_back() {
        let mut limit = RateLimit::new("k", 10, 0);
        assert!(limit.add_step_run("run-1", 6));
        assert!(!limit.add_step_run("run-2", 7));
        // the rejected run's contribution is gone, the first run's stays
        assert_eq!(limit.consumed_units(), 6);
    }

    #[test]
    fn rollback_removes_only_that_step_run() {
        let mut limit = RateLimit::new("k", 10, 0);
        limit.add_step_run("run-1", 4);
        limit.add_step_run("run-2", 3);
        limit.rollback("run-1");
        assert_eq!(limit.consumed_units(), 3);
    }

    #[test]
    fn rollback_unknown_step_run_is_idempotent() {
        let mut limit = RateLimit::new("k", 10, 0);
        limit.add_step_run("run-1", 4);
        limit.rollback("never-seen");
        limit.rollback("run-1");
        limit.rollback("run-1");
        assert_eq!(limit.consumed_units(), 0);
    }

    #[test]
    fn unknown_key_is_permissive() {
        let mut set = RateLimitSet::new(vec![]);
        assert!(set.try_consume("run-1", "no-such-limit", 100));
        assert!(set.consumed_snapshot().is_empty());
    }

    #[test]
    fn rollback_step_run_covers_every_key() {
        let mut set = RateLimitSet::new(vec![
            RateLimitSnapshot {
                key: "a".to_string(),
                max_units: 10,
                next_refill_at_ms: 0,
            },
            RateLimitSnapshot {
                key: "b".to_string(),
                max_units: 10,
                next_refill_at_ms: 0,
            },
        ]);
        assert!(set.try_consume("run-1", "a", 5));
        assert!(set.try_consume("run-1", "b", 5));
        set.rollback_step_run("run-1");

        let snapshot = set.consumed_snapshot();
        assert_eq!(snapshot["a"], 0);
        assert_eq!(snapshot["b"], 0);
    }

    #[test]
    fn cache_reports_exhausted_until_refill() {
        let cache = ExhaustedLimitCache::new(60_000);
        cache.set_exhausted("tenant-1", "default", Some(5_000), 1_000);
        assert!(cache.is_exhausted("tenant-1", "default", 4_999));
        assert!(!cache.is_exhausted("tenant-1", "other", 4_999));
    }

    #[test]
    fn cache_self_evicts_expired_entries() {
        let cache = ExhaustedLimitCache::new(60_000);
        cache.set_exhausted("tenant-1", "default", Some(5_000), 1_000);
        assert!(!cache.is_exhausted("tenant-1", "default", 5_000));
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_clamps_to_max_duration() {
        let cache = ExhaustedLimitCache::new(1_000);
        // refill far beyond the cap
        cache.set_exhausted("tenant-1", "default", Some(999_999), 1_000);
        assert!(cache.is_exhausted("tenant-1", "default", 1_999));
        assert!(!cache.is_exhausted("tenant-1", "default", 2_000));
    }

    #[test]
    fn cache_without_refill_time_uses_max_duration() {
        let cache = ExhaustedLimitCache::new(1_000);
        cache.set_exhausted("tenant-1", "default", None, 1_000);
        assert!(cache.is_exhausted("tenant-1", "default", 1_999));
        assert!(!cache.is_exhausted("tenant-1", "default", 2_001));
    }

    #[test]
    fn cache_keeps_earliest_refill() {
        let cache = ExhaustedLimitCache::new(60_000);
        cache.set_exhausted("tenant-1", "default", Some(9_000), 1_000);
        cache.set_exhausted("tenant-1", "default", Some(3_000), 1_000);
        assert!(!cache.is_exhausted("tenant-1", "default", 3_000));
    }
}
