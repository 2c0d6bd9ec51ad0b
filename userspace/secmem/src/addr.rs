// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical address primitives shared by the allocator and mapping layers.

use core::fmt;

/// Base page shift.
pub const PAGE_SHIFT: u32 = 12;
/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
/// Size of the largest translation granule (a level-2 section, 2 MiB).
pub const SECTION_SIZE: u64 = 2 * 1024 * 1024;
/// Allocation alignment order for region blocks (64 MiB with 4 KiB pages).
pub const REGION_ALIGN_ORDER: u32 = 14;
/// Ceiling applied in 32-bit compatibility mode (the 4 GiB boundary).
pub const UPPER_LIMIT_32: u64 = 0x1_0000_0000;
/// Ceiling applied in full-range mode.
pub const UPPER_LIMIT_64: u64 = u64::MAX;

/// Physical address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Wraps a raw physical address.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw address.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the page frame number containing this address.
    pub const fn pfn(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// Returns `true` when the address is a multiple of `align`.
    pub const fn is_aligned(self, align: u64) -> bool {
        align != 0 && self.0 % align == 0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for PhysAddr {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Half-open physical range `[base, base + size)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PhysRange {
    base: PhysAddr,
    size: u64,
}

impl PhysRange {
    /// Creates a range starting at `base` spanning `size` bytes.
    pub const fn new(base: PhysAddr, size: u64) -> Self {
        Self { base, size }
    }

    /// Creates a range covering `pages` base pages.
    pub const fn from_pages(base: PhysAddr, pages: usize) -> Self {
        Self { base, size: pages_to_bytes(pages) }
    }

    /// First byte of the range.
    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    /// Length in bytes.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// One past the last byte. Saturates instead of wrapping.
    pub const fn end(&self) -> u64 {
        self.base.as_u64().saturating_add(self.size)
    }

    /// Number of whole base pages covered.
    pub const fn page_count(&self) -> usize {
        (self.size >> PAGE_SHIFT) as usize
    }

    /// Returns `true` when the range has no bytes.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns `true` when `other` lies entirely inside this range.
    pub const fn contains(&self, other: &PhysRange) -> bool {
        other.base.as_u64() >= self.base.as_u64() && other.end() <= self.end()
    }
}

impl fmt::Display for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}-{:#x}] ({:#x})", self.base.as_u64(), self.end(), self.size)
    }
}

/// Converts a page count to bytes.
pub const fn pages_to_bytes(pages: usize) -> u64 {
    (pages as u64) << PAGE_SHIFT
}

/// Rounds `value` up to a multiple of `align` (power of two). Returns `None` on overflow.
pub(crate) fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
