// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Normal-world visibility of physical ranges.
//!
//! Regions are isolated by clearing the valid bit of the section descriptors
//! that cover them in the kernel linear map. Operations work on whole
//! sections only and flush translation caches before reporting success.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::addr::{PhysAddr, PhysRange, SECTION_SIZE};
use crate::error::MapError;

/// Toggles normal-world visibility of physical ranges.
pub trait MappingController: Send + Sync {
    /// Removes `range` from the normal-world mapping.
    fn unmap(&self, range: PhysRange) -> Result<(), MapError>;

    /// Restores `range` in the normal-world mapping.
    fn map(&self, range: PhysRange) -> Result<(), MapError>;
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in a level-2 section descriptor.
    pub struct SectionFlags: u8 {
        /// Descriptor translates.
        const VALID = 1 << 0;
        /// Descriptor points at a next-level page table instead of a block.
        const TABLE = 1 << 1;
    }
}

/// Section-granular model of the kernel linear map.
pub struct SectionMapper {
    memory: Vec<PhysRange>,
    sections: Mutex<BTreeMap<u64, SectionFlags>>,
    flushes: AtomicU64,
}

impl SectionMapper {
    /// Builds a linear map where every section of `memory` is block-mapped and valid.
    pub fn new(memory: impl IntoIterator<Item = PhysRange>) -> Self {
        let memory: Vec<PhysRange> = memory.into_iter().collect();
        let mut sections = BTreeMap::new();
        for range in &memory {
            let first = range.base().as_u64() / SECTION_SIZE;
            let last = range.end().div_ceil(SECTION_SIZE);
            for index in first..last {
                sections.insert(index, SectionFlags::VALID);
            }
        }
        debug!("linear map: {} sections over {} ranges", sections.len(), memory.len());
        Self { memory, sections: Mutex::new(sections), flushes: AtomicU64::new(0) }
    }

    /// Marks the section containing `addr` as split into a page table.
    ///
    /// Later map/unmap requests touching it fault, as they would on a kernel
    /// whose linear map was broken down to page granularity there.
    pub fn split_section(&self, addr: PhysAddr) -> bool {
        let mut sections = self.sections.lock();
        match sections.get_mut(&(addr.as_u64() / SECTION_SIZE)) {
            Some(flags) => {
                flags.insert(SectionFlags::TABLE);
                true
            }
            None => false,
        }
    }

    /// Returns `true` when every section of `range` is currently valid.
    pub fn is_mapped(&self, range: PhysRange) -> bool {
        let sections = self.sections.lock();
        section_indices(range).all(|index| {
            sections.get(&index).is_some_and(|flags| flags.contains(SectionFlags::VALID))
        })
    }

    /// Number of translation-cache flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    fn check_range(&self, range: PhysRange) -> Result<(), MapError> {
        check_sections(range)?;
        if !self.memory.iter().any(|mem| mem.contains(&range)) {
            info!("[invalid parameter]: {} outside memory", range);
            return Err(MapError::InvalidParameter);
        }
        Ok(())
    }

    fn set_valid(&self, range: PhysRange, valid: bool) -> Result<(), MapError> {
        self.check_range(range)?;
        let mut sections = self.sections.lock();
        // Validate the whole range first so a fault leaves the table untouched.
        for index in section_indices(range) {
            match sections.get(&index) {
                None => {
                    warn!("section {:#x}: no descriptor", index * SECTION_SIZE);
                    return Err(MapError::Fault);
                }
                Some(flags) if flags.contains(SectionFlags::TABLE) => {
                    warn!("section {:#x}: table descriptor, not a block", index * SECTION_SIZE);
                    return Err(MapError::Fault);
                }
                Some(_) => {}
            }
        }
        for index in section_indices(range) {
            if let Some(flags) = sections.get_mut(&index) {
                flags.set(SectionFlags::VALID, valid);
            }
        }
        drop(sections);
        self.flush_tlb();
        debug!("{} {}", if valid { "mapped" } else { "unmapped" }, range);
        Ok(())
    }

    fn flush_tlb(&self) {
        self.flushes.fetch_add(1, Ordering::Release);
    }
}

impl MappingController for SectionMapper {
    fn unmap(&self, range: PhysRange) -> Result<(), MapError> {
        self.set_valid(range, false)
    }

    fn map(&self, range: PhysRange) -> Result<(), MapError> {
        self.set_valid(range, true)
    }
}

/// Accepts only nonempty, section-aligned ranges that do not start at zero.
fn check_sections(range: PhysRange) -> Result<(), MapError> {
    let aligned = range.base().is_aligned(SECTION_SIZE) && range.size() % SECTION_SIZE == 0;
    if !aligned || range.is_empty() || range.base().as_u64() == 0 {
        info!("[invalid parameter]: start={}, size={:#x}", range.base(), range.size());
        return Err(MapError::InvalidParameter);
    }
    Ok(())
}

fn section_indices(range: PhysRange) -> impl Iterator<Item = u64> {
    let first = range.base().as_u64() / SECTION_SIZE;
    let last = range.end().div_ceil(SECTION_SIZE);
    first..last
}

/// Mapper for targets without a section-mapped linear map.
///
/// Nothing is torn down; both directions only drop cached kernel mappings.
/// Ranges must still be section-granular.
#[derive(Default)]
pub struct FlatMapper {
    flushes: AtomicU64,
}

impl FlatMapper {
    /// Creates a flat mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl MappingController for FlatMapper {
    fn unmap(&self, range: PhysRange) -> Result<(), MapError> {
        check_sections(range)?;
        self.flushes.fetch_add(1, Ordering::Release);
        debug!("unmapped {} (flat)", range);
        Ok(())
    }

    fn map(&self, range: PhysRange) -> Result<(), MapError> {
        check_sections(range)?;
        self.flushes.fetch_add(1, Ordering::Release);
        debug!("mapped {} (flat)", range);
        Ok(())
    }
}
