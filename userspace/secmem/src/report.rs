// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Advisory fault reports.
//!
//! Faults never fail the transition that raised them; they are handed to a
//! [`Reporter`] so the platform can collect diagnostics.

use core::fmt;

use log::{error, warn};

use crate::addr::PhysRange;
use crate::region::RegionId;

/// Category of an advisory report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Isolating a freshly drawn block failed; the block stays mapped.
    UnmapFailed,
    /// Restoring a block failed; the region now keeps it as a dedicated reservation.
    RemapFailed,
    /// The primary region stayed idle for the whole watchdog countdown.
    WatchdogExpired,
    /// Boot-time layout check failed.
    SanityFailed,
}

impl FaultKind {
    /// Short tag used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnmapFailed => "offline unmapping fail",
            Self::RemapFailed => "online remapping fail",
            Self::WatchdogExpired => "online timeout",
            Self::SanityFailed => "sanity fail",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One advisory report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultReport {
    /// What went wrong.
    pub kind: FaultKind,
    /// Region involved, if any.
    pub region: Option<RegionId>,
    /// Physical range involved, if any.
    pub range: Option<PhysRange>,
    /// Free-form detail.
    pub detail: String,
}

impl FaultReport {
    /// Creates a report without region or range.
    pub fn new(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self { kind, region: None, range: None, detail: detail.into() }
    }

    /// Attaches the region.
    pub fn with_region(mut self, region: RegionId) -> Self {
        self.region = Some(region);
        self
    }

    /// Attaches the physical range.
    pub fn with_range(mut self, range: PhysRange) -> Self {
        self.range = Some(range);
        self
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(region) = self.region {
            write!(f, " region={}", region)?;
        }
        if let Some(range) = self.range {
            write!(f, " range={}", range)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Sink for advisory reports.
pub trait Reporter: Send + Sync {
    /// Records `report`. Must not block for long.
    fn report(&self, report: &FaultReport);
}

/// Reporter that writes to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, report: &FaultReport) {
        match report.kind {
            FaultKind::WatchdogExpired => warn!("{}", report),
            _ => error!("{}", report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::PhysAddr;

    #[test]
    fn display_includes_context() {
        let report = FaultReport::new(FaultKind::UnmapFailed, "section split")
            .with_region(RegionId::Svp)
            .with_range(PhysRange::new(PhysAddr::new(0x4000_0000), 0x20_0000));
        let text = report.to_string();
        assert!(text.starts_with("[offline unmapping fail]"));
        assert!(text.contains("region=svp"));
        assert!(text.contains("0x40000000"));
        assert!(text.ends_with("section split"));
    }
}
