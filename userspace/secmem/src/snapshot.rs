// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time status of the whole subsystem.

use core::fmt;

use crate::addr::{PhysRange, PAGE_SHIFT};
use crate::region::{RegionId, RegionMode, RegionSnapshot};

/// Consistent view of the pool, both regions and the global knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Pool window managed by the allocator.
    pub pool: PhysRange,
    /// Per-region view, in [`RegionId::ALL`] order.
    pub regions: [RegionSnapshot; 2],
    /// Pages currently drawn from the pool.
    pub usage_pages: u64,
    /// Current physical-address ceiling.
    pub upper_limit: u64,
}

impl Snapshot {
    /// View of one region.
    pub fn region(&self, id: RegionId) -> &RegionSnapshot {
        &self.regions[id.index()]
    }
}

impl fmt::Display for Snapshot {
    /// Renders the classic status text, one fact per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.pool.base();
        writeln!(f, "pool info: [{}-{:#x}] ({:#x})", base, self.pool.end(), self.pool.size())?;
        writeln!(
            f,
            "pool info: base {} pfn [{}-{}] count {}",
            base,
            base.pfn(),
            self.pool.end() >> PAGE_SHIFT,
            self.pool.page_count()
        )?;
        for region in &self.regions {
            writeln!(
                f,
                "{} region base:{}, count {}, state {}.{}",
                region.id,
                region.base,
                region.page_count,
                region.state,
                if region.mode == RegionMode::Dedicated { " (cache memory)" } else { "" }
            )?;
        }
        writeln!(f, "pool usage: {} pages", self.usage_pages)?;
        writeln!(f, "[CONFIG]:")?;
        writeln!(f, "upper_limit: {:#x}", self.upper_limit)
    }
}
