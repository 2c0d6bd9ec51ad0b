// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Global context: the two region slots, the shared knobs and the watchdog.
//!
//! [`SecureMemory`] is built once at boot and cloned into every caller. All
//! clones share the same state; there is no process-wide singleton.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::addr::{PhysRange, UPPER_LIMIT_64};
use crate::allocator::ContiguousAllocator;
use crate::error::Result;
use crate::mapping::MappingController;
use crate::policy::{Clock, RetryPolicy, SystemClock, WatchdogPolicy};
use crate::region::{Env, Region, RegionId, RegionMode, RegionSpec, RegionState};
use crate::report::{FaultKind, FaultReport, LogReporter, Reporter};
use crate::snapshot::Snapshot;
use crate::watchdog::{Armed, Subject, Watchdog, WatchdogOutcome};

/// Platform collaborators the regions drive.
#[derive(Clone)]
pub struct Platform {
    /// Shared contiguous pool.
    pub allocator: Arc<dyn ContiguousAllocator>,
    /// Normal-world visibility toggle.
    pub mapper: Arc<dyn MappingController>,
    /// Sleep source for retries and watchdog ticks.
    pub clock: Arc<dyn Clock>,
    /// Sink for advisory fault reports.
    pub reporter: Arc<dyn Reporter>,
}

impl Platform {
    /// Uses the real clock and logs reports.
    pub fn new(
        allocator: Arc<dyn ContiguousAllocator>,
        mapper: Arc<dyn MappingController>,
    ) -> Self {
        Self { allocator, mapper, clock: Arc::new(SystemClock), reporter: Arc::new(LogReporter) }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

/// Boot-time region layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Primary (secure video path) slot.
    pub svp: RegionSpec,
    /// Trusted UI slot.
    pub tui: RegionSpec,
}

impl Layout {
    /// Both slots disabled.
    pub const fn disabled() -> Self {
        Self { svp: RegionSpec::Disabled, tui: RegionSpec::Disabled }
    }

    /// Configured backing of one slot.
    pub fn spec(&self, id: RegionId) -> RegionSpec {
        match id {
            RegionId::Svp => self.svp,
            RegionId::Tui => self.tui,
        }
    }
}

/// Runtime knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tunables {
    /// Initial physical-address ceiling.
    pub upper_limit: u64,
    /// Offline retry budget.
    pub retry: RetryPolicy,
    /// Idle watchdog timing.
    pub watchdog: WatchdogPolicy,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            upper_limit: UPPER_LIMIT_64,
            retry: RetryPolicy::default(),
            watchdog: WatchdogPolicy::default(),
        }
    }
}

struct Shared {
    platform: Platform,
    regions: [Region; 2],
    upper_limit: AtomicU64,
    usage: AtomicU64,
    retry: RetryPolicy,
    watchdog: Watchdog,
}

impl Shared {
    fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    fn env(&self) -> Env<'_> {
        Env {
            allocator: self.platform.allocator.as_ref(),
            mapper: self.platform.mapper.as_ref(),
            clock: self.platform.clock.as_ref(),
            reporter: self.platform.reporter.as_ref(),
            usage: &self.usage,
            retry: self.retry,
        }
    }

    fn snapshot(&self) -> Snapshot {
        // Fixed lock order: svp before tui.
        let svp = self.regions[0].lock();
        let tui = self.regions[1].lock();
        Snapshot {
            pool: self.platform.allocator.extent(),
            regions: [self.regions[0].snapshot_locked(&svp), self.regions[1].snapshot_locked(&tui)],
            usage_pages: self.usage.load(Ordering::Acquire),
            upper_limit: self.upper_limit.load(Ordering::Acquire),
        }
    }
}

impl Subject for Shared {
    fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    fn clock(&self) -> &dyn Clock {
        self.platform.clock.as_ref()
    }

    fn primary_online(&self) -> bool {
        self.region(RegionId::Svp).state() == RegionState::On
    }

    fn on_expired(&self) {
        let snapshot = self.snapshot();
        for line in snapshot.to_string().lines() {
            warn!("{}", line);
        }
        self.platform.reporter.report(
            &FaultReport::new(
                FaultKind::WatchdogExpired,
                format!("svp state {} after idle countdown", snapshot.region(RegionId::Svp).state),
            )
            .with_region(RegionId::Svp),
        );
    }
}

/// Handle to the secure memory subsystem.
#[derive(Clone)]
pub struct SecureMemory {
    shared: Arc<Shared>,
}

impl SecureMemory {
    /// Builds both region slots. Enabled regions start `ON`.
    pub fn new(platform: Platform, layout: Layout, tunables: Tunables) -> Self {
        let regions = RegionId::ALL.map(|id| Region::new(id, layout.spec(id)));
        for region in &regions {
            info!(
                "{} region: mode {:?}, {} pages, state {}",
                region.id(),
                region.mode(),
                region.page_count(),
                region.state()
            );
        }
        Self {
            shared: Arc::new(Shared {
                platform,
                regions,
                upper_limit: AtomicU64::new(tunables.upper_limit),
                usage: AtomicU64::new(0),
                retry: tunables.retry,
                watchdog: Watchdog::new(tunables.watchdog),
            }),
        }
    }

    /// Returns the region's memory to the kernel. Requires `OFF`.
    pub fn online(&self, id: RegionId) -> Result<()> {
        let shared = &self.shared;
        shared.region(id).online(&shared.env())
    }

    /// Takes the region's memory for the secure world. Requires `ON`.
    ///
    /// The block ends at or below both `upper_limit` and the global ceiling.
    pub fn offline(&self, id: RegionId, upper_limit: u64) -> Result<PhysRange> {
        let shared = &self.shared;
        let limit = upper_limit.min(shared.upper_limit.load(Ordering::Acquire));
        shared.region(id).offline(&shared.env(), limit)
    }

    /// Registers a consumer of the primary region.
    pub fn acquire_reference(&self) {
        let count = self.shared.watchdog.acquire();
        info!("svp reference acquired, count {}", count);
    }

    /// Drops a consumer; the last one arms the idle watchdog.
    ///
    /// A release without a matching acquire is logged and ignored.
    pub fn release_reference(&self) {
        let Some(count) = self.shared.watchdog.release() else {
            return;
        };
        info!("svp reference released, count {}", count);
        if count == 0 {
            match Watchdog::arm(&self.shared) {
                Armed::Spawned => info!("svp idle watchdog started"),
                Armed::Reset | Armed::Failed => {}
            }
        }
    }

    /// Current number of consumers.
    pub fn reference_count(&self) -> usize {
        self.shared.watchdog.references()
    }

    /// Current ceiling.
    pub fn upper_limit(&self) -> u64 {
        self.shared.upper_limit.load(Ordering::Acquire)
    }

    /// Replaces the ceiling for subsequent offline calls.
    pub fn set_upper_limit(&self, limit: u64) {
        self.shared.upper_limit.store(limit, Ordering::Release);
        info!("upper_limit set to {:#x}", limit);
    }

    /// Pages currently drawn from the pool.
    pub fn usage_pages(&self) -> u64 {
        self.shared.usage.load(Ordering::Acquire)
    }

    /// Current state of one region, read without locking it.
    pub fn state(&self, id: RegionId) -> RegionState {
        self.shared.region(id).state()
    }

    /// Backing mode of one region.
    pub fn mode(&self, id: RegionId) -> RegionMode {
        self.shared.region(id).mode()
    }

    /// Pages per block of one region.
    pub fn page_count(&self, id: RegionId) -> usize {
        self.shared.region(id).page_count()
    }

    /// Whether the region's block is currently unmapped from the normal world.
    pub fn is_unmapped(&self, id: RegionId) -> bool {
        self.shared.region(id).is_unmapped()
    }

    /// Returns `true` when at least one region has backing.
    pub fn is_initialized(&self) -> bool {
        RegionId::ALL.iter().any(|id| self.state(*id) != RegionState::Disabled)
    }

    /// Consistent view of both regions and the global knobs.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot()
    }

    /// Whether an idle countdown is live.
    pub fn watchdog_running(&self) -> bool {
        self.shared.watchdog.is_running()
    }

    /// Ticks left on the current or last countdown.
    pub fn watchdog_remaining_ticks(&self) -> u32 {
        self.shared.watchdog.remaining_ticks()
    }

    /// Waits for the most recent countdown task to finish.
    ///
    /// Returns `None` when no task was started since the last join.
    pub fn join_watchdog(&self) -> Option<WatchdogOutcome> {
        self.shared.watchdog.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{PhysAddr, UPPER_LIMIT_32};
    use crate::error::Error;
    use crate::testing::{RecordingClock, RecordingMapper, RecordingReporter, ScriptedAllocator};

    fn memory(allocator: ScriptedAllocator, layout: Layout) -> SecureMemory {
        let platform = Platform::new(Arc::new(allocator), Arc::new(RecordingMapper::new()))
            .with_clock(Arc::new(RecordingClock::new()))
            .with_reporter(Arc::new(RecordingReporter::new()));
        SecureMemory::new(platform, layout, Tunables::default())
    }

    fn pool_layout(pages: usize) -> Layout {
        Layout { svp: RegionSpec::Pool { page_count: pages }, tui: RegionSpec::Disabled }
    }

    #[test]
    fn offline_applies_tighter_of_both_ceilings() {
        let allocator = ScriptedAllocator::always(PhysAddr::new(0x1_2000_0000));
        let memory = memory(allocator, pool_layout(4));
        memory.set_upper_limit(UPPER_LIMIT_32);
        let err = memory.offline(RegionId::Svp, u64::MAX).unwrap_err();
        assert!(matches!(err, Error::Retry { limit: UPPER_LIMIT_32, .. }));
        assert_eq!(memory.state(RegionId::Svp), RegionState::On);
    }

    #[test]
    fn disabled_region_is_busy() {
        let memory = memory(ScriptedAllocator::exhausted(), pool_layout(4));
        assert_eq!(
            memory.online(RegionId::Tui),
            Err(Error::Busy { region: RegionId::Tui, state: RegionState::Disabled })
        );
        assert!(memory.is_initialized());
    }

    #[test]
    fn snapshot_reports_held_block() {
        let memory = memory(ScriptedAllocator::always(PhysAddr::new(0x1000_0000)), pool_layout(4));
        memory.offline(RegionId::Svp, u64::MAX).expect("offline");
        let snapshot = memory.snapshot();
        let svp = snapshot.region(RegionId::Svp);
        assert_eq!(svp.base, PhysAddr::new(0x1000_0000));
        assert_eq!(svp.state, RegionState::Off);
        assert_eq!(snapshot.usage_pages, 4);
        assert_eq!(snapshot.region(RegionId::Tui).mode, RegionMode::Disabled);
    }

    #[test]
    fn status_text_marks_only_dedicated_regions() {
        let layout = Layout {
            svp: RegionSpec::Pool { page_count: 4 },
            tui: RegionSpec::Dedicated {
                range: PhysRange::new(PhysAddr::new(0x7000_0000), 0x0100_0000),
            },
        };
        let memory = memory(ScriptedAllocator::exhausted(), layout);
        let text = memory.snapshot().to_string();
        let svp = text.lines().find(|line| line.starts_with("svp region")).expect("svp line");
        let tui = text.lines().find(|line| line.starts_with("tui region")).expect("tui line");
        assert!(!svp.ends_with("(cache memory)"));
        assert!(tui.ends_with("state [ON]. (cache memory)"));
    }

    #[test]
    fn nested_references_do_not_arm() {
        let memory = memory(ScriptedAllocator::exhausted(), pool_layout(4));
        memory.acquire_reference();
        memory.acquire_reference();
        memory.release_reference();
        assert_eq!(memory.reference_count(), 1);
        assert!(!memory.watchdog_running());
        assert_eq!(memory.join_watchdog(), None);
    }
}
