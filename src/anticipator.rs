//! Anticipator - Markov-style offset predictor gating prefetch
//!
//! Tracks the last few accessed offsets and, per known offset, a handful of
//! observed successors with confidence counters. `prefetch_ok` answers
//! whether a speculative read of a candidate offset is justified by recent
//! history. Workers may ignore it entirely without affecting correctness.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Depth of the access-history ring and of the successor slots
pub const MARKOV_DEPTH: usize = 3;

/// Capacity of the prediction table
const TABLE_SIZE: usize = 512;

/// Successor confidence required to justify a prefetch
const PREFETCH_CONFIDENCE: u32 = 2;

/// An ancestor older than this no longer justifies a prefetch
const PREFETCH_RECENCY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
struct PredictorEntry {
    offset: u64,
    confidence: u32,
    freq: u64,
    last_seen: Instant,
    next_offsets: [u64; MARKOV_DEPTH],
    next_conf: [u32; MARKOV_DEPTH],
}

impl PredictorEntry {
    fn new(offset: u64) -> Self {
        Self {
            offset,
            confidence: 0,
            freq: 0,
            last_seen: Instant::now(),
            next_offsets: [0; MARKOV_DEPTH],
            next_conf: [0; MARKOV_DEPTH],
        }
    }

    /// Record `next` as an observed successor; empty slots (conf 0) are
    /// claimed first, then the weakest slot is recycled
    fn record_successor(&mut self, next: u64) {
        for i in 0..MARKOV_DEPTH {
            if self.next_conf[i] > 0 && self.next_offsets[i] == next {
                self.next_conf[i] = self.next_conf[i].saturating_add(1);
                return;
            }
        }
        let slot = (0..MARKOV_DEPTH)
            .min_by_key(|&i| self.next_conf[i])
            .unwrap_or(0);
        self.next_offsets[slot] = next;
        self.next_conf[slot] = 1;
    }

    fn predicts(&self, next: u64) -> bool {
        (0..MARKOV_DEPTH)
            .any(|i| self.next_offsets[i] == next && self.next_conf[i] >= PREFETCH_CONFIDENCE)
    }
}

#[derive(Debug, Default)]
struct AnticipatorState {
    history: VecDeque<u64>,
    table: Vec<PredictorEntry>,
}

impl AnticipatorState {
    fn entry_mut(&mut self, offset: u64) -> &mut PredictorEntry {
        if let Some(i) = self.table.iter().position(|e| e.offset == offset) {
            return &mut self.table[i];
        }
        if self.table.len() < TABLE_SIZE {
            self.table.push(PredictorEntry::new(offset));
            let last = self.table.len() - 1;
            return &mut self.table[last];
        }
        // Recycle the least confident entry, breaking ties by frequency
        let weakest = self
            .table
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| (e.confidence, e.freq))
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.table[weakest] = PredictorEntry::new(offset);
        &mut self.table[weakest]
    }
}

/// Markov-chain style access predictor
pub struct Anticipator {
    state: Mutex<AnticipatorState>,
}

impl Anticipator {
    /// Create an empty predictor
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AnticipatorState::default()),
        }
    }

    /// Record an access, linking it as a successor of the previous one
    pub fn learn(&self, offset: u64) {
        let mut state = self.state.lock();

        if let Some(&prev) = state.history.back() {
            if prev != offset {
                state.entry_mut(prev).record_successor(offset);
            }
        }

        let entry = state.entry_mut(offset);
        entry.confidence = entry.confidence.saturating_add(1);
        entry.freq += 1;
        entry.last_seen = Instant::now();

        state.history.push_back(offset);
        while state.history.len() > MARKOV_DEPTH {
            state.history.pop_front();
        }
    }

    /// Whether recent history predicts `next` confidently enough to spend
    /// a speculative read on it
    pub fn prefetch_ok(&self, next: u64) -> bool {
        let state = self.state.lock();
        for &ancestor in state.history.iter() {
            if let Some(entry) = state.table.iter().find(|e| e.offset == ancestor) {
                if entry.last_seen.elapsed() < PREFETCH_RECENCY && entry.predicts(next) {
                    return true;
                }
            }
        }
        false
    }

    /// Number of tracked offsets
    pub fn tracked(&self) -> usize {
        self.state.lock().table.len()
    }
}

impl Default for Anticipator {
    fn default() -> Self {
        Self::new()
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
    fn test_unknown_offset_not_prefetched() {
        let anticipator = Anticipator::new();
        assert!(!anticipator.prefetch_ok(BLOCK));
    }

    #[test]
    fn test_single_observation_is_not_enough() {
        let anticipator = Anticipator::new();
        anticipator.learn(0);
        anticipator.learn(BLOCK);

        anticipator.learn(0);
        // 0 -> 4096 seen once: below the confidence gate
        assert!(!anticipator.prefetch_ok(BLOCK));
    }

    #[test]
    fn test_repeated_transition_enables_prefetch() {
        let anticipator = Anticipator::new();

        anticipator.learn(0);
        anticipator.learn(BLOCK);
        anticipator.learn(0);
        anticipator.learn(BLOCK);

        anticipator.learn(0);
        assert!(anticipator.prefetch_ok(BLOCK));
    }

    #[test]
    fn test_prediction_requires_matching_successor() {
        let anticipator = Anticipator::new();

        for _ in 0..3 {
            anticipator.learn(0);
            anticipator.learn(BLOCK);
        }

        anticipator.learn(0);
        assert!(!anticipator.prefetch_ok(2 * BLOCK));
    }

    #[test]
    fn test_history_depth_limits_ancestors() {
        let anticipator = Anticipator::new();

        // Teach 0 -> 4096 strongly, then push 0 out of the history ring
        for _ in 0..3 {
            anticipator.learn(0);
            anticipator.learn(BLOCK);
        }
        for i in 10..10 + MARKOV_DEPTH as u64 {
            anticipator.learn(i * BLOCK);
        }

        // No ancestor in the ring predicts 4096 anymore
        assert!(!anticipator.prefetch_ok(BLOCK));
    }

    #[test]
    fn test_table_is_bounded() {
        let anticipator = Anticipator::new();
        for i in 0..2000u64 {
            anticipator.learn(i * BLOCK);
        }
        assert!(anticipator.tracked() <= TABLE_SIZE);
    }

    #[test]
    fn test_successor_slot_recycling() {
        let mut entry = PredictorEntry::new(0);

        for next in [BLOCK, 2 * BLOCK, 3 * BLOCK] {
            entry.record_successor(next);
            entry.record_successor(next);
        }
        // All slots at confidence 2; a fourth successor recycles one slot
        entry.record_successor(4 * BLOCK);

        let occupied: Vec<u64> = (0..MARKOV_DEPTH)
            .filter(|&i| entry.next_conf[i] > 0)
            .map(|i| entry.next_offsets[i])
            .collect();
        assert_eq!(occupied.len(), MARKOV_DEPTH);
        assert!(occupied.contains(&(4 * BLOCK)));
    }
}
