//! Ring log - circular snapshot buffer of recently processed pages
//!
//! Workers append every processed page; a single cursor advances modulo the
//! ring size. An append that would not fit in the remaining slice is refused
//! and logged rather than split across the boundary. Nothing in the core
//! reads the ring back; it exists as a recent-page snapshot buffer.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::BLOCK_SIZE;

struct RingState {
    buffer: Vec<u8>,
    pos: usize,
}

/// Fixed-size circular byte buffer of processed pages
pub struct RingLog {
    state: Mutex<RingState>,
    appended: AtomicU64,
    refused: AtomicU64,
}

impl RingLog {
    /// Create a ring of `size` bytes
    pub fn new(size: usize) -> Self {
        info!(size, "ring log initialized");
        Self {
            state: Mutex::new(RingState {
                buffer: vec![0u8; size],
                pos: 0,
            }),
            appended: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        }
    }

    /// Append one page, advancing the cursor modulo the ring size.
    ///
    /// Returns false (and logs) when the remaining slice is smaller than a
    /// block; the cursor does not move in that case.
    pub fn append(&self, offset: u64, page: &[u8]) -> bool {
        debug_assert_eq!(page.len(), BLOCK_SIZE);

        let mut state = self.state.lock();
        if state.pos + BLOCK_SIZE > state.buffer.len() {
            drop(state);
            self.refused.fetch_add(1, Ordering::Relaxed);
            warn!(offset, "ring log overflow prevented");
            return false;
        }

        let pos = state.pos;
        let len = state.buffer.len();
        state.buffer[pos..pos + BLOCK_SIZE].copy_from_slice(page);
        state.pos = (pos + BLOCK_SIZE) % len;
        drop(state);

        self.appended.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.state.lock().pos
    }

    /// Ring size in bytes
    pub fn size(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Pages appended so far
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Appends refused for lack of space
    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn read_at(&self, pos: usize, len: usize) -> Vec<u8> {
        self.state.lock().buffer[pos..pos + len].to_vec()
    }
}

// =============================================================================
// Tests
// =============================================================================
