//! Cache entry types

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::BLOCK_SIZE;

/// In-memory representation of one block: a fixed-size page buffer
#[derive(Clone)]
pub struct Page(Box<[u8; BLOCK_SIZE]>);

impl Page {
    /// A page of all zeros
    pub fn zeroed() -> Self {
        Page(vec![0u8; BLOCK_SIZE].into_boxed_slice().try_into().unwrap())
    }

    /// Build a page from up to `BLOCK_SIZE` bytes, zero-padding the tail
    pub fn from_slice(data: &[u8]) -> Self {
        let mut page = Self::zeroed();
        let n = data.len().min(BLOCK_SIZE);
        page.0[..n].copy_from_slice(&data[..n]);
        page
    }

    /// View the page as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }

    /// View the page as a mutable byte slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0[..]
    }
}

impl std::ops::Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::DerefMut for Page {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Page[{} bytes]", BLOCK_SIZE)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One cached block.
///
/// The offset is immutable after insertion; the page content is guarded by
/// its own mutex; dirty/last_access are atomics so the hit path can update
/// them under the shard lock alone. The LRU slot is assigned once, when the
/// entry is linked into the recency list.
pub struct CacheEntry {
    offset: u64,
    page: Mutex<Page>,
    dirty: AtomicBool,
    last_access: AtomicU64,
    lru_slot: AtomicU32,
}

impl CacheEntry {
    /// Create an entry holding `page` at `offset`
    pub fn new(offset: u64, page: Page, dirty: bool) -> Self {
        Self {
            offset,
            page: Mutex::new(page),
            dirty: AtomicBool::new(dirty),
            last_access: AtomicU64::new(epoch_secs()),
            lru_slot: AtomicU32::new(u32::MAX),
        }
    }

    /// Block offset this entry caches
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Copy out the current page content
    pub fn snapshot(&self) -> Page {
        self.page.lock().clone()
    }

    /// Overwrite the page content
    pub fn store_page(&self, data: &[u8]) {
        let mut page = self.page.lock();
        let n = data.len().min(BLOCK_SIZE);
        page.as_mut_slice()[..n].copy_from_slice(&data[..n]);
    }

    /// Whether the entry has unwritten modifications
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Mark the entry dirty
    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag after a successful write-back
    #[inline]
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Record an access
    #[inline]
    pub fn touch(&self) {
        self.last_access.store(epoch_secs(), Ordering::Relaxed);
    }

    /// Last access time (epoch seconds)
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Stable LRU arena slot
    #[inline]
    pub fn lru_slot(&self) -> u32 {
        self.lru_slot.load(Ordering::Acquire)
    }

    /// Record the LRU arena slot after linking
    #[inline]
    pub fn set_lru_slot(&self, slot: u32) {
        self.lru_slot.store(slot, Ordering::Release);
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("offset", &self.offset)
            .field("dirty", &self.is_dirty())
            .field("last_access", &self.last_access())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_zeroed() {
        let page = Page::zeroed();
        assert_eq!(page.len(), BLOCK_SIZE);
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_from_short_slice_pads() {
        let page = Page::from_slice(&[0xAB; 16]);
        assert_eq!(&page[..16], &[0xAB; 16]);
        assert!(page[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_entry_dirty_transitions() {
        let entry = CacheEntry::new(4096, Page::zeroed(), false);
        assert!(!entry.is_dirty());

        entry.mark_dirty();
        assert!(entry.is_dirty());

        entry.mark_clean();
        assert!(!entry.is_dirty());
    }

    #[test]
    fn test_entry_created_dirty_on_write_intent() {
        let entry = CacheEntry::new(0, Page::zeroed(), true);
        assert!(entry.is_dirty());
    }

    #[test]
    fn test_store_page_and_snapshot() {
        let entry = CacheEntry::new(0, Page::zeroed(), false);
        entry.store_page(&[0x5A; 32]);

        let snap = entry.snapshot();
        assert_eq!(&snap[..32], &[0x5A; 32]);
        assert!(snap[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_lru_slot_assignment() {
        let entry = CacheEntry::new(0, Page::zeroed(), false);
        entry.set_lru_slot(17);
        assert_eq!(entry.lru_slot(), 17);
    }
}
