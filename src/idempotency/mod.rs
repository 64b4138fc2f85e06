//! # Idempotency Guard
//!
//! Size- and time-bounded duplicate-delivery detector shared by every consumer. The
//! broker delivers at-least-once, so redelivered messages carry the same event id;
//! the guard's atomic check-and-mark is what turns that into effectively-once side
//! effects.
//!
//! Marking is two-phase: `check_and_mark` records the key in progress, and the
//! handler promotes it with `mark_processed` on success or drops it with `release`
//! on failure so a scheduled redelivery is not swallowed as a duplicate.
//!
//! Capacity eviction is least-recently-used; expiry is TTL from first sighting.
//! Evicting an old record can only cause a bounded chance of reprocessing a very old
//! duplicate, which at-least-once downstream already tolerates.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Result of a check-and-mark: proceed on `Fresh`, skip silently on `Duplicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordStatus {
    InProgress,
    Processed,
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    status: RecordStatus,
    first_seen_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    recency: u64,
}

#[derive(Debug, Default)]
struct GuardInner {
    records: HashMap<String, IdempotencyRecord>,
    /// Recency counter -> key, for O(log n) least-recently-used eviction.
    by_recency: BTreeMap<u64, String>,
    clock: u64,
}

impl GuardInner {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(record) = self.records.get_mut(key) {
            self.by_recency.remove(&record.recency);
            record.recency = clock;
            self.by_recency.insert(clock, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<IdempotencyRecord> {
        let record = self.records.remove(key)?;
        self.by_recency.remove(&record.recency);
        Some(record)
    }

    fn evict_lru(&mut self) {
        let oldest = self.by_recency.keys().next().copied();
        if let Some(recency) = oldest {
            if let Some(key) = self.by_recency.remove(&recency) {
                self.records.remove(&key);
            }
        }
    }
}

/// Shared duplicate-delivery guard. Injected explicitly into every consumer rather
/// than living behind a global.
#[derive(Debug)]
pub struct IdempotencyGuard {
    inner: Mutex<GuardInner>,
    ttl: Duration,
    max_entries: usize,
}

impl IdempotencyGuard {
    /// Retention defaults matching the platform's shared store: 24h TTL, 10k keys.
    pub fn new() -> Self {
        Self::with_limits(std::time::Duration::from_secs(24 * 60 * 60), 10_000)
    }

    pub fn with_limits(ttl: std::time::Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(GuardInner::default()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(24)),
            max_entries: max_entries.max(1),
        }
    }

    /// Atomically check for a prior sighting of `key` and record it if absent.
    ///
    /// The whole check-and-insert happens under one lock acquisition: two consumers
    /// racing on the same key cannot both observe `Fresh`.
    pub fn check_and_mark(&self, key: &str) -> Freshness {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        if let Some(record) = inner.records.get(key) {
            if record.expires_at > now {
                inner.touch(key);
                return Freshness::Duplicate;
            }
            // Expired record is the same as no record.
            inner.remove(key);
        }

        while inner.records.len() >= self.max_entries {
            inner.evict_lru();
        }

        inner.clock += 1;
        let clock = inner.clock;
        inner.records.insert(
            key.to_string(),
            IdempotencyRecord {
                status: RecordStatus::InProgress,
                first_seen_at: now,
                expires_at: now + self.ttl,
                recency: clock,
            },
        );
        inner.by_recency.insert(clock, key.to_string());
        Freshness::Fresh
    }

    /// Promote an in-progress key to processed after the handler's side effects
    /// have committed.
    pub fn mark_processed(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(key) {
            record.status = RecordStatus::Processed;
        }
    }

    /// Drop an in-progress record so a redelivery of the same event is processed
    /// again. Keys already promoted to processed stay recorded.
    pub fn release(&self, key: &str) {
        let mut inner = self.inner.lock();
        let in_progress = inner
            .records
            .get(key)
            .is_some_and(|r| r.status == RecordStatus::InProgress);
        if in_progress {
            inner.remove(key);
            debug!(key = %key, "Released in-progress idempotency record");
        }
    }

    /// Age of the record for `key`, if one is retained. Diagnostic surface.
    pub fn first_seen_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().records.get(key).map(|r| r.first_seen_at)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_first_sighting_is_fresh_second_is_duplicate() {
        let guard = IdempotencyGuard::new();
        assert_eq!(guard.check_and_mark("e1"), Freshness::Fresh);
        assert_eq!(guard.check_and_mark("e1"), Freshness::Duplicate);
        assert_eq!(guard.check_and_mark("e2"), Freshness::Fresh);
    }

    #[test]
    fn test_release_allows_reprocessing() {
        let guard = IdempotencyGuard::new();
        assert_eq!(guard.check_and_mark("e1"), Freshness::Fresh);
        guard.release("e1");
        assert_eq!(guard.check_and_mark("e1"), Freshness::Fresh);
    }

    #[test]
    fn test_release_keeps_processed_records() {
        let guard = IdempotencyGuard::new();
        guard.check_and_mark("e1");
        guard.mark_processed("e1");
        guard.release("e1");
        assert_eq!(guard.check_and_mark("e1"), Freshness::Duplicate);
    }

    #[test]
    fn test_ttl_expiry_treats_key_as_fresh() {
        let guard = IdempotencyGuard::with_limits(StdDuration::from_millis(10), 100);
        assert_eq!(guard.check_and_mark("e1"), Freshness::Fresh);
        std::thread::sleep(StdDuration::from_millis(25));
        assert_eq!(guard.check_and_mark("e1"), Freshness::Fresh);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let guard = IdempotencyGuard::with_limits(StdDuration::from_secs(3600), 3);
        guard.check_and_mark("a");
        guard.check_and_mark("b");
        guard.check_and_mark("c");
        // Touch "a" so "b" is now the coldest entry.
        assert_eq!(guard.check_and_mark("a"), Freshness::Duplicate);

        guard.check_and_mark("d");
        assert_eq!(guard.len(), 3);
        assert_eq!(guard.check_and_mark("b"), Freshness::Fresh); // evicted
        // Eviction of "b" pushed out another cold key, but "d" must still be known.
        assert_eq!(guard.check_and_mark("d"), Freshness::Duplicate);
    }

    #[test]
    fn test_concurrent_check_and_mark_yields_single_fresh() {
        let guard = Arc::new(IdempotencyGuard::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = Arc::clone(&guard);
            handles.push(std::thread::spawn(move || {
                guard.check_and_mark("contested")
            }));
        }

        let fresh_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|f| *f == Freshness::Fresh)
            .count();
        assert_eq!(fresh_count, 1);
    }
}
