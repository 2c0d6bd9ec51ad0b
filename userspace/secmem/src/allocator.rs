// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Contiguous block allocation from the shared pool.
//!
//! The pool is contended by both regions and by the offline retry loop, so
//! implementations serialize internally. A [`Block`] is an owned handle:
//! releasing it consumes the handle, which rules out double release.

use core::fmt;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::addr::{checked_align_up, PhysAddr, PhysRange, PAGE_SHIFT, PAGE_SIZE};

/// Identifies the consumer drawing from the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolTag(&'static str);

impl PoolTag {
    /// Tag used by the secure region lifecycle.
    pub const SECURE: PoolTag = PoolTag("memory-ssvp");

    /// Creates a custom tag.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the tag name.
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Physically contiguous block issued by an allocator.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    range: PhysRange,
}

impl Block {
    /// Wraps a block of `pages` pages at `base`.
    ///
    /// Intended for [`ContiguousAllocator`] implementations; the region core
    /// never fabricates blocks itself.
    pub fn from_raw(base: PhysAddr, pages: usize) -> Self {
        Self { range: PhysRange::from_pages(base, pages) }
    }

    /// Physical range covered by the block.
    pub fn range(&self) -> PhysRange {
        self.range
    }

    /// First physical address of the block.
    pub fn base(&self) -> PhysAddr {
        self.range.base()
    }
}

/// Source of aligned, physically contiguous blocks.
pub trait ContiguousAllocator: Send + Sync {
    /// Requests `page_count` pages aligned to `PAGE_SIZE << align_order`.
    ///
    /// Returns `None` when the pool cannot satisfy the request right now.
    fn allocate(&self, page_count: usize, align_order: u32, tag: PoolTag) -> Option<Block>;

    /// Returns `block` (spanning `page_count` pages) to the pool.
    fn release(&self, block: Block, page_count: usize);

    /// Physical window managed by the pool.
    fn extent(&self) -> PhysRange;
}

const WORD_BITS: usize = u64::BITS as usize;

/// First-fit bitmap allocator over a fixed physical window.
pub struct PoolAllocator {
    extent: PhysRange,
    bitmap: Mutex<Bitmap>,
}

struct Bitmap {
    words: Vec<u64>,
    pages: usize,
    used: usize,
}

impl Bitmap {
    fn new(pages: usize) -> Self {
        let words = vec![0u64; pages.div_ceil(WORD_BITS)];
        Self { words, pages, used: 0 }
    }

    fn is_set(&self, index: usize) -> bool {
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    fn set(&mut self, index: usize) {
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    fn clear(&mut self, index: usize) {
        self.words[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
    }

    fn run_is_free(&self, start: usize, len: usize) -> bool {
        (start..start + len).all(|index| !self.is_set(index))
    }

    fn run_is_used(&self, start: usize, len: usize) -> bool {
        (start..start + len).all(|index| self.is_set(index))
    }
}

impl PoolAllocator {
    /// Creates a pool covering the whole pages of `extent`.
    ///
    /// An unaligned base is rounded up to the next page and partial trailing
    /// pages are ignored, so every block starts on a page boundary.
    pub fn new(extent: PhysRange) -> Self {
        let extent = whole_pages(extent);
        let pages = extent.page_count();
        debug!("pool: {} ({} pages)", extent, pages);
        Self { extent, bitmap: Mutex::new(Bitmap::new(pages)) }
    }

    /// Pages currently handed out.
    pub fn used_pages(&self) -> usize {
        self.bitmap.lock().used
    }

    /// Total pages managed by the pool.
    pub fn total_pages(&self) -> usize {
        self.bitmap.lock().pages
    }

    fn index_of(&self, addr: PhysAddr) -> usize {
        ((addr.as_u64() - self.extent.base().as_u64()) >> PAGE_SHIFT) as usize
    }
}

impl ContiguousAllocator for PoolAllocator {
    fn allocate(&self, page_count: usize, align_order: u32, tag: PoolTag) -> Option<Block> {
        if page_count == 0 || align_order >= u64::BITS - PAGE_SHIFT {
            return None;
        }
        let align_pages = 1u64 << align_order;
        let base_pfn = self.extent.base().pfn();
        // First page index whose physical frame is aligned.
        let first = checked_align_up(base_pfn, align_pages)? - base_pfn;
        let step = usize::try_from(align_pages).ok()?;
        let mut start = usize::try_from(first).ok()?;

        let mut bitmap = self.bitmap.lock();
        while start.checked_add(page_count)? <= bitmap.pages {
            if bitmap.run_is_free(start, page_count) {
                for index in start..start + page_count {
                    bitmap.set(index);
                }
                bitmap.used += page_count;
                let base = PhysAddr::new(
                    self.extent.base().as_u64() + ((start as u64) << PAGE_SHIFT),
                );
                trace!("pool: {} took {} pages at {}", tag, page_count, base);
                return Some(Block::from_raw(base, page_count));
            }
            start = start.checked_add(step)?;
        }
        debug!("pool: {} request for {} pages (order {}) failed", tag, page_count, align_order);
        None
    }

    fn release(&self, block: Block, page_count: usize) {
        let range = PhysRange::from_pages(block.base(), page_count);
        if !self.extent.contains(&range) || !range.base().is_aligned(PAGE_SIZE) {
            warn!("pool: release of {} outside pool {}", range, self.extent);
            return;
        }
        let start = self.index_of(range.base());
        let mut bitmap = self.bitmap.lock();
        if page_count > bitmap.pages.saturating_sub(start) {
            warn!("pool: release of {} runs past the last page, ignored", range);
            return;
        }
        if !bitmap.run_is_used(start, page_count) {
            warn!("pool: release of {} covers free pages, ignored", range);
            return;
        }
        for index in start..start + page_count {
            bitmap.clear(index);
        }
        bitmap.used -= page_count;
        trace!("pool: released {}", range);
    }

    fn extent(&self) -> PhysRange {
        self.extent
    }
}

fn whole_pages(extent: PhysRange) -> PhysRange {
    let base = extent.base().as_u64();
    match checked_align_up(base, PAGE_SIZE) {
        Some(aligned) if aligned <= extent.end() => {
            let size = (extent.end() - aligned) & !(PAGE_SIZE - 1);
            PhysRange::new(PhysAddr::new(aligned), size)
        }
        _ => PhysRange::new(extent.base(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::REGION_ALIGN_ORDER;

    const MIB: u64 = 1024 * 1024;

    fn pool(base: u64, size: u64) -> PoolAllocator {
        PoolAllocator::new(PhysRange::new(PhysAddr::new(base), size))
    }

    #[test]
    fn allocations_are_aligned() {
        let pool = pool(0x4000_0000 + 4 * MIB, 256 * MIB);
        let pages = (16 * MIB / PAGE_SIZE) as usize;
        let block = pool.allocate(pages, REGION_ALIGN_ORDER, PoolTag::SECURE).expect("fits");
        assert!(block.base().is_aligned(64 * MIB));
        assert!(pool.extent().contains(&block.range()));
    }

    #[test]
    fn exhaustion_returns_none_and_release_recycles() {
        let pool = pool(0x4000_0000, 64 * MIB);
        let pages = (64 * MIB / PAGE_SIZE) as usize;
        let block = pool.allocate(pages, REGION_ALIGN_ORDER, PoolTag::SECURE).expect("fits");
        assert!(pool.allocate(1, 0, PoolTag::SECURE).is_none());
        pool.release(block, pages);
        assert_eq!(pool.used_pages(), 0);
        assert!(pool.allocate(pages, REGION_ALIGN_ORDER, PoolTag::SECURE).is_some());
    }

    #[test]
    fn blocks_do_not_overlap() {
        let pool = pool(0x4000_0000, 256 * MIB);
        let pages = (32 * MIB / PAGE_SIZE) as usize;
        let a = pool.allocate(pages, REGION_ALIGN_ORDER, PoolTag::SECURE).expect("a");
        let b = pool.allocate(pages, REGION_ALIGN_ORDER, PoolTag::SECURE).expect("b");
        assert_ne!(a.base(), b.base());
        assert!(a.range().end() <= b.base().as_u64() || b.range().end() <= a.base().as_u64());
        assert_eq!(pool.used_pages(), 2 * pages);
    }

    #[test]
    fn foreign_release_is_ignored() {
        let pool = pool(0x4000_0000, 4 * MIB);
        pool.release(Block::from_raw(PhysAddr::new(0x1000), 1), 1);
        pool.release(Block::from_raw(PhysAddr::new(0x4000_0000), 1), 1);
        assert_eq!(pool.used_pages(), 0);
    }

    #[test]
    fn unaligned_base_is_rounded_to_whole_pages() {
        let pool = pool(0x4000_0800, 256 * MIB);
        assert_eq!(pool.extent().base(), PhysAddr::new(0x4000_1000));
        assert!(pool.extent().base().is_aligned(PAGE_SIZE));
        let pages = (64 * MIB / PAGE_SIZE) as usize;
        let block = pool.allocate(pages, REGION_ALIGN_ORDER, PoolTag::SECURE).expect("fits");
        assert!(block.base().is_aligned(64 * MIB));
        assert!(pool.extent().contains(&block.range()));
    }

    #[test]
    fn release_past_last_whole_page_is_ignored() {
        // 64 whole pages plus a partial trailing page.
        let pool = pool(0x4000_0000, 64 * PAGE_SIZE + 0x800);
        assert_eq!(pool.total_pages(), 64);
        let block = pool.allocate(64, 0, PoolTag::SECURE).expect("fits");
        pool.release(Block::from_raw(PhysAddr::new(0x4000_0000 + 63 * PAGE_SIZE), 2), 2);
        assert_eq!(pool.used_pages(), 64);
        pool.release(block, 64);
        assert_eq!(pool.used_pages(), 0);
    }

    #[test]
    fn zero_pages_rejected() {
        let pool = pool(0x4000_0000, 4 * MIB);
        assert!(pool.allocate(0, 0, PoolTag::SECURE).is_none());
    }
}
