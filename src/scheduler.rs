//! Work scheduler - per-core hot-block tracking and migration
//!
//! Each core owns a bounded queue of work units describing the blocks it has
//! touched recently and how hot they are. Underloaded cores steal the
//! hottest recent unit from the most loaded queue. A stolen offset is
//! removed under the victim queue's lock, so a given call hands it to at
//! most one thief; the same offset may be re-learned later through
//! `report_access`, which is accepted behavior (the cache serializes
//! concurrent work on one offset anyway).

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Capacity of each per-core queue
pub const MAX_QUEUE_SIZE: usize = 128;

/// A stolen unit must have been seen within this window
const STEAL_RECENCY: Duration = Duration::from_secs(10);

/// One tracked block on one core
#[derive(Debug, Clone, Copy)]
pub struct WorkUnit {
    /// Block offset
    pub offset: u64,
    /// Access count since the unit was learned
    pub hotness: u32,
    /// Time of the most recent report
    pub last_seen: Instant,
}

/// Per-core hot-block tracker and cross-core migration policy
pub struct Scheduler {
    queues: Vec<Mutex<Vec<WorkUnit>>>,
    migration_threshold: usize,
}

impl Scheduler {
    /// Create a scheduler for `cores` worker cores
    pub fn new(cores: usize, migration_threshold: usize) -> Self {
        info!(cores, migration_threshold, "scheduler initialized");
        Self {
            queues: (0..cores)
                .map(|_| Mutex::new(Vec::with_capacity(MAX_QUEUE_SIZE)))
                .collect(),
            migration_threshold,
        }
    }

    /// Number of cores the scheduler tracks
    pub fn cores(&self) -> usize {
        self.queues.len()
    }

    /// Record that `core_id` touched `offset`.
    ///
    /// An existing unit gets hotter; otherwise the offset is learned,
    /// overwriting the coldest unit when the queue is full.
    pub fn report_access(&self, core_id: usize, offset: u64) {
        let mut queue = self.queues[core_id].lock();
        let now = Instant::now();

        if let Some(unit) = queue.iter_mut().find(|u| u.offset == offset) {
            unit.hotness = unit.hotness.saturating_add(1);
            unit.last_seen = now;
            return;
        }

        let unit = WorkUnit {
            offset,
            hotness: 1,
            last_seen: now,
        };
        if queue.len() < MAX_QUEUE_SIZE {
            queue.push(unit);
        } else if let Some(coldest) = queue
            .iter_mut()
            .min_by_key(|u| u.hotness)
        {
            *coldest = unit;
        }
    }

    /// Current depth of one core's queue
    pub fn queue_len(&self, core_id: usize) -> usize {
        self.queues[core_id].lock().len()
    }

    /// Queue depths across all cores
    pub fn queue_lens(&self) -> Vec<usize> {
        (0..self.queues.len()).map(|i| self.queue_len(i)).collect()
    }

    /// Whether `core_id` is significantly underloaded relative to the mean
    /// of the other cores and should steal work
    pub fn should_migrate(&self, core_id: usize) -> bool {
        let mut total = 0usize;
        let mut others = 0usize;
        for (i, queue) in self.queues.iter().enumerate() {
            if i != core_id {
                total += queue.lock().len();
                others += 1;
            }
        }
        if others == 0 {
            return false;
        }
        let avg = (total / others) as isize;
        (self.queue_len(core_id) as isize) < avg - self.migration_threshold as isize
    }

    /// Steal the hottest recently-seen unit from the most loaded other
    /// core, if that queue is deep enough to give work away
    pub fn get_migrated_task(&self, core_id: usize) -> Option<u64> {
        let victim = (0..self.queues.len())
            .filter(|&i| i != core_id)
            .max_by_key(|&i| self.queue_len(i))?;
        self.steal_from(victim).map(|unit| {
            debug!(
                thief = core_id,
                victim,
                offset = unit.offset,
                hotness = unit.hotness,
                "migrated task"
            );
            unit.offset
        })
    }

    /// Remove and return the hottest recent unit from `victim`'s queue,
    /// provided the queue holds more than the migration threshold
    fn steal_from(&self, victim: usize) -> Option<WorkUnit> {
        let mut queue = self.queues[victim].lock();
        if queue.len() <= self.migration_threshold {
            return None;
        }
        let now = Instant::now();
        let best = queue
            .iter()
            .enumerate()
            .filter(|(_, u)| now.duration_since(u.last_seen) < STEAL_RECENCY)
            .max_by_key(|(_, u)| u.hotness)
            .map(|(i, _)| i)?;
        Some(queue.swap_remove(best))
    }

    /// Opportunistic rebalance: when the gap between the most and least
    /// loaded cores exceeds the threshold, move one hot unit from the
    /// former to the latter
    pub fn balance_load(&self) {
        let lens = self.queue_lens();
        let Some((max_core, &max_len)) = lens.iter().enumerate().max_by_key(|(_, &l)| l) else {
            return;
        };
        let Some((min_core, &min_len)) = lens.iter().enumerate().min_by_key(|(_, &l)| l) else {
            return;
        };
        if max_core == min_core || max_len.saturating_sub(min_len) <= self.migration_threshold {
            return;
        }

        if let Some(unit) = self.steal_from(max_core) {
            debug!(
                from = max_core,
                to = min_core,
                offset = unit.offset,
                "rebalanced unit"
            );
            self.insert_unit(min_core, unit);
        }
    }

    /// Place a migrated unit into a queue, keeping its heat; a full queue
    /// gives up its coldest slot
    fn insert_unit(&self, core_id: usize, unit: WorkUnit) {
        let mut queue = self.queues[core_id].lock();
        if let Some(existing) = queue.iter_mut().find(|u| u.offset == unit.offset) {
            existing.hotness = existing.hotness.saturating_add(unit.hotness);
            existing.last_seen = unit.last_seen;
        } else if queue.len() < MAX_QUEUE_SIZE {
            queue.push(unit);
        } else if let Some(coldest) = queue.iter_mut().min_by_key(|u| u.hotness) {
            *coldest = unit;
        }
    }

    #[cfg(test)]
    fn unit(&self, core_id: usize, offset: u64) -> Option<WorkUnit> {
        self.queues[core_id]
            .lock()
            .iter()
            .find(|u| u.offset == offset)
            .copied()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u64 = 4096;

    #[test]
    fn test_report_access_learns_offset() {
        let scheduler = Scheduler::new(2, 5);
        scheduler.report_access(0, BLOCK);

        let unit = scheduler.unit(0, BLOCK).unwrap();
        assert_eq!(unit.hotness, 1);
        assert_eq!(scheduler.queue_len(0), 1);
    }

    #[test]
    fn test_report_idempotence_hotness_counts_calls() {
        let scheduler = Scheduler::new(2, 5);

        for _ in 0..7 {
            scheduler.report_access(0, BLOCK);
        }

        let unit = scheduler.unit(0, BLOCK).unwrap();
        assert_eq!(unit.hotness, 7);
        assert_eq!(scheduler.queue_len(0), 1);
        assert!(unit.last_seen.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let scheduler = Scheduler::new(1, 5);

        for i in 0..(MAX_QUEUE_SIZE as u64 * 2) {
            scheduler.report_access(0, i * BLOCK);
            assert!(scheduler.queue_len(0) <= MAX_QUEUE_SIZE);
        }
        assert_eq!(scheduler.queue_len(0), MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_full_queue_overwrites_coldest() {
        let scheduler = Scheduler::new(1, 5);

        for i in 0..MAX_QUEUE_SIZE as u64 {
            scheduler.report_access(0, i * BLOCK);
        }
        // Heat offset 0 well above the rest
        for _ in 0..5 {
            scheduler.report_access(0, 0);
        }

        let fresh = MAX_QUEUE_SIZE as u64 * BLOCK;
        scheduler.report_access(0, fresh);

        assert_eq!(scheduler.queue_len(0), MAX_QUEUE_SIZE);
        assert!(scheduler.unit(0, fresh).is_some());
        // The hot unit survives; a hotness-1 unit was the victim
        assert_eq!(scheduler.unit(0, 0).unwrap().hotness, 6);
    }

    #[test]
    fn test_should_migrate_when_underloaded() {
        let scheduler = Scheduler::new(2, 5);

        for i in 0..20u64 {
            scheduler.report_access(0, i * BLOCK);
        }

        // Core 1 is empty: 0 < 20 - 5
        assert!(scheduler.should_migrate(1));
        // Core 0 is above the mean of the others
        assert!(!scheduler.should_migrate(0));
    }

    #[test]
    fn test_should_migrate_respects_threshold() {
        let scheduler = Scheduler::new(2, 5);

        for i in 0..20u64 {
            scheduler.report_access(0, i * BLOCK);
        }
        for i in 0..16u64 {
            scheduler.report_access(1, i * BLOCK);
        }
        // 16 is within the threshold of avg 20
        assert!(!scheduler.should_migrate(1));
    }

    #[test]
    fn test_single_core_never_migrates() {
        let scheduler = Scheduler::new(1, 5);
        assert!(!scheduler.should_migrate(0));
        assert_eq!(scheduler.get_migrated_task(0), None);
    }

    #[test]
    fn test_steal_takes_hottest_and_removes_it() {
        let scheduler = Scheduler::new(2, 5);

        // 20 units; the first three have hotness 5, 4, 3
        for i in 0..20u64 {
            scheduler.report_access(0, i * BLOCK);
        }
        for _ in 0..4 {
            scheduler.report_access(0, 0);
        }
        for _ in 0..3 {
            scheduler.report_access(0, BLOCK);
        }
        for _ in 0..2 {
            scheduler.report_access(0, 2 * BLOCK);
        }

        assert!(scheduler.should_migrate(1));
        let stolen = scheduler.get_migrated_task(1).unwrap();
        assert_eq!(stolen, 0);
        assert_eq!(scheduler.queue_len(0), 19);
        assert!(scheduler.unit(0, 0).is_none());
    }

    #[test]
    fn test_no_steal_from_shallow_queue() {
        let scheduler = Scheduler::new(2, 5);

        for i in 0..5u64 {
            scheduler.report_access(0, i * BLOCK);
        }
        // Queue length equals the threshold: nothing to give away
        assert_eq!(scheduler.get_migrated_task(1), None);
        assert_eq!(scheduler.queue_len(0), 5);
    }

    #[test]
    fn test_concurrent_steals_never_duplicate() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let scheduler = Arc::new(Scheduler::new(5, 5));
        for i in 0..20u64 {
            scheduler.report_access(0, i * BLOCK);
        }

        let handles: Vec<_> = (1..5)
            .map(|core| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    let mut stolen = Vec::new();
                    while let Some(offset) = scheduler.get_migrated_task(core) {
                        stolen.push(offset);
                    }
                    stolen
                })
            })
            .collect();

        let mut all: Vec<u64> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "an offset was stolen twice");
        // Stealing stops once the victim is at the threshold
        assert_eq!(all.len(), 15);
        assert_eq!(scheduler.queue_len(0), 5);
    }

    #[test]
    fn test_balance_load_moves_one_unit() {
        let scheduler = Scheduler::new(3, 5);

        for i in 0..10u64 {
            scheduler.report_access(0, i * BLOCK);
        }

        scheduler.balance_load();

        let lens = scheduler.queue_lens();
        assert_eq!(lens[0], 9);
        assert_eq!(lens.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_balance_load_noop_within_threshold() {
        let scheduler = Scheduler::new(2, 5);

        for i in 0..4u64 {
            scheduler.report_access(0, i * BLOCK);
        }

        scheduler.balance_load();
        assert_eq!(scheduler.queue_len(0), 4);
        assert_eq!(scheduler.queue_len(1), 0);
    }

    #[test]
    fn test_rebalanced_unit_keeps_heat() {
        let scheduler = Scheduler::new(2, 2);

        for i in 0..10u64 {
            scheduler.report_access(0, i * BLOCK);
        }
        for _ in 0..3 {
            scheduler.report_access(0, 7 * BLOCK);
        }

        scheduler.balance_load();

        let unit = scheduler.unit(1, 7 * BLOCK).unwrap();
        assert_eq!(unit.hotness, 4);
    }
}
