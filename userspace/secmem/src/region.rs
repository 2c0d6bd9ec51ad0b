// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-region lifecycle.
//!
//! ```text
//!   DISABLED (sink)
//!
//!   ON --offline--> OFFING --ok--> OFF --online--> ONING_WAIT --> ON
//!                     |
//!                     +--retry exhausted--> ON
//! ```
//!
//! `OFF` means the region's memory is held away from the kernel and (when
//! possible) unmapped from the normal world. A pool-backed region owns an
//! allocator block exactly while it is `OFF`; a dedicated region owns its
//! reservation for its whole life and only lends it out while `OFF`.

use core::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use log::{debug, error, info};
use parking_lot::{Mutex, MutexGuard};

use crate::addr::{PhysAddr, PhysRange, REGION_ALIGN_ORDER};
use crate::allocator::{Block, ContiguousAllocator, PoolTag};
use crate::error::{Error, Result};
use crate::mapping::MappingController;
use crate::policy::{Clock, RetryPolicy};
use crate::report::{FaultKind, FaultReport, Reporter};

/// The two region slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionId {
    /// Secure video path region; the primary region watched by the idle watchdog.
    Svp,
    /// Trusted UI region.
    Tui,
}

impl RegionId {
    /// Every slot, in snapshot order.
    pub const ALL: [RegionId; 2] = [RegionId::Svp, RegionId::Tui];

    /// Short name used in commands and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Svp => "svp",
            Self::Tui => "tui",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Svp => 0,
            Self::Tui => 1,
        }
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegionState {
    /// Not configured; never transitions.
    Disabled = 0,
    /// Memory held for the secure world.
    Off = 1,
    /// Online transition in progress.
    OningWait = 2,
    /// Memory available to the kernel.
    On = 3,
    /// Offline transition in progress.
    Offing = 4,
}

impl RegionState {
    /// Bracketed label used in logs and the status text.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "[DISABLED]",
            Self::Off => "[OFF]",
            Self::OningWait => "[ONING_WAIT]",
            Self::On => "[ON]",
            Self::Offing => "[OFFING]",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Off,
            2 => Self::OningWait,
            3 => Self::On,
            4 => Self::Offing,
            _ => Self::Disabled,
        }
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a region's memory comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionMode {
    /// Drawn from the shared pool on every offline.
    Pool,
    /// Fixed reservation owned for the region's whole life.
    Dedicated,
    /// No backing at all.
    Disabled,
}

impl RegionMode {
    /// Returns `true` for [`RegionMode::Dedicated`].
    pub const fn uses_dedicated_block(self) -> bool {
        matches!(self, Self::Dedicated)
    }
}

/// Boot-time description of one region slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionSpec {
    /// Slot is not configured.
    Disabled,
    /// Slot draws `page_count` pages from the pool.
    Pool {
        /// Pages requested per offline.
        page_count: usize,
    },
    /// Slot owns a fixed reservation.
    Dedicated {
        /// The reservation.
        range: PhysRange,
    },
}

/// Atomic mirror of the region state readable without the region lock.
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: RegionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> RegionState {
        RegionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: RegionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

enum Reservation {
    /// Reservation handed over at boot.
    Fixed(PhysRange),
    /// Pool block kept after it could not be mapped back.
    Adopted(Block),
}

impl Reservation {
    fn range(&self) -> PhysRange {
        match self {
            Self::Fixed(range) => *range,
            Self::Adopted(block) => block.range(),
        }
    }
}

enum Backing {
    Pool { block: Option<Block> },
    Dedicated { reservation: Reservation, lent: bool },
    Disabled,
}

pub(crate) struct RegionInner {
    backing: Backing,
    is_unmapped: bool,
}

/// Collaborators a transition needs.
pub(crate) struct Env<'a> {
    pub allocator: &'a dyn ContiguousAllocator,
    pub mapper: &'a dyn MappingController,
    pub clock: &'a dyn Clock,
    pub reporter: &'a dyn Reporter,
    pub usage: &'a AtomicU64,
    pub retry: RetryPolicy,
}

/// Point-in-time view of one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionSnapshot {
    /// Slot identity.
    pub id: RegionId,
    /// Base of the block currently held for the secure world, or 0.
    pub base: PhysAddr,
    /// Pages per block.
    pub page_count: usize,
    /// Lifecycle state.
    pub state: RegionState,
    /// Backing mode.
    pub mode: RegionMode,
}

pub(crate) struct Region {
    id: RegionId,
    page_count: usize,
    state: StateCell,
    inner: Mutex<RegionInner>,
}

impl Region {
    pub(crate) fn new(id: RegionId, spec: RegionSpec) -> Self {
        let (page_count, state, backing, is_unmapped) = match spec {
            RegionSpec::Pool { page_count } if page_count > 0 => {
                (page_count, RegionState::On, Backing::Pool { block: None }, false)
            }
            RegionSpec::Dedicated { range } if range.page_count() > 0 => (
                range.page_count(),
                RegionState::On,
                Backing::Dedicated { reservation: Reservation::Fixed(range), lent: false },
                true,
            ),
            _ => (0, RegionState::Disabled, Backing::Disabled, false),
        };
        Self {
            id,
            page_count,
            state: StateCell::new(state),
            inner: Mutex::new(RegionInner { backing, is_unmapped }),
        }
    }

    pub(crate) fn id(&self) -> RegionId {
        self.id
    }

    pub(crate) fn page_count(&self) -> usize {
        self.page_count
    }

    /// Lock-free read of the current state.
    pub(crate) fn state(&self) -> RegionState {
        self.state.load()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegionInner> {
        self.inner.lock()
    }

    pub(crate) fn snapshot_locked(&self, inner: &RegionInner) -> RegionSnapshot {
        let base = match &inner.backing {
            Backing::Pool { block: Some(block) } => block.base(),
            Backing::Dedicated { reservation, lent: true } => reservation.range().base(),
            _ => PhysAddr::new(0),
        };
        RegionSnapshot {
            id: self.id,
            base,
            page_count: self.page_count,
            state: self.state(),
            mode: mode_of(&inner.backing),
        }
    }

    pub(crate) fn mode(&self) -> RegionMode {
        mode_of(&self.inner.lock().backing)
    }

    pub(crate) fn is_unmapped(&self) -> bool {
        self.inner.lock().is_unmapped
    }

    /// Returns the region's memory to the kernel.
    pub(crate) fn online(&self, env: &Env<'_>) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = self.state();
        info!("{} online >>>>>> enter state: {}", self.id, state);
        if state != RegionState::Off {
            info!("{} online <<<<<< leave state: {}, busy", self.id, state);
            return Err(Error::Busy { region: self.id, state });
        }

        self.state.store(RegionState::OningWait);
        let RegionInner { backing, is_unmapped } = &mut *inner;
        *backing = match std::mem::replace(backing, Backing::Disabled) {
            Backing::Dedicated { reservation, .. } => {
                Backing::Dedicated { reservation, lent: false }
            }
            Backing::Pool { block: Some(block) } => self.give_back(block, is_unmapped, env),
            other => {
                error!("{} online: no block held while OFF", self.id);
                other
            }
        };
        self.state.store(RegionState::On);

        info!("{} online <<<<<< leave state: {}", self.id, self.state());
        Ok(())
    }

    /// Takes memory away from the kernel for the secure world.
    ///
    /// `limit` is the effective ceiling; every accepted block ends at or below it.
    pub(crate) fn offline(&self, env: &Env<'_>, limit: u64) -> Result<PhysRange> {
        let mut inner = self.inner.lock();
        let state = self.state();
        info!("{} offline >>>>>> state: {}, upper_limit: {:#x}", self.id, state, limit);
        if state != RegionState::On {
            info!("{} offline <<<<<< state: {}, busy", self.id, state);
            return Err(Error::Busy { region: self.id, state });
        }

        self.state.store(RegionState::Offing);
        let RegionInner { backing, is_unmapped } = &mut *inner;
        let result = match backing {
            Backing::Dedicated { reservation, lent } => {
                *lent = true;
                Ok(reservation.range())
            }
            Backing::Pool { block } => self.take_from_pool(limit, env).map(|taken| {
                let range = taken.range();
                *is_unmapped = self.isolate(range, env);
                *block = Some(taken);
                range
            }),
            Backing::Disabled => Err(Error::Busy { region: self.id, state }),
        };

        match &result {
            Ok(range) => {
                self.state.store(RegionState::Off);
                info!("{} offline: [reserve done]: {}", self.id, range);
            }
            Err(_) => self.state.store(RegionState::On),
        }
        info!("{} offline <<<<<< state: {}", self.id, self.state());
        result
    }

    /// Draws a block ending at or below `limit`, retrying per the policy.
    fn take_from_pool(&self, limit: u64, env: &Env<'_>) -> Result<Block> {
        let attempts = env.retry.max_attempts;
        for attempt in 0..attempts {
            if attempt > 0 {
                env.clock.sleep(env.retry.interval);
            }
            debug!("{} [allocation]: attempt {}/{}", self.id, attempt + 1, attempts);
            let Some(block) =
                env.allocator.allocate(self.page_count, REGION_ALIGN_ORDER, PoolTag::SECURE)
            else {
                continue;
            };
            let end = PhysRange::from_pages(block.base(), self.page_count).end();
            if end <= limit {
                env.usage.fetch_add(self.page_count as u64, Ordering::AcqRel);
                return Ok(block);
            }
            error!(
                "{} [reserve over limit]: block end {:#x} over limit {:#x}",
                self.id, end, limit
            );
            env.allocator.release(block, self.page_count);
        }
        Err(Error::Retry { region: self.id, limit, attempts })
    }

    /// Unmaps a freshly drawn block. Returns whether it is now isolated.
    fn isolate(&self, range: PhysRange, env: &Env<'_>) -> bool {
        match env.mapper.unmap(range) {
            Ok(()) => true,
            Err(err) => {
                info!("{} [unmapping fail]: {}: {}", self.id, range, err);
                env.reporter.report(
                    &FaultReport::new(FaultKind::UnmapFailed, err.to_string())
                        .with_region(self.id)
                        .with_range(range),
                );
                false
            }
        }
    }

    /// Maps `block` back if needed and returns it to the pool.
    ///
    /// A block that cannot be mapped back is never handed to the pool again;
    /// the region keeps it as its dedicated reservation from then on.
    fn give_back(&self, block: Block, is_unmapped: &mut bool, env: &Env<'_>) -> Backing {
        if *is_unmapped {
            if let Err(err) = env.mapper.map(block.range()) {
                info!("{} [remapping fail]: {}: {}", self.id, block.range(), err);
                env.reporter.report(
                    &FaultReport::new(FaultKind::RemapFailed, err.to_string())
                        .with_region(self.id)
                        .with_range(block.range()),
                );
                return Backing::Dedicated { reservation: Reservation::Adopted(block), lent: false };
            }
            *is_unmapped = false;
        }
        env.allocator.release(block, self.page_count);
        env.usage.fetch_sub(self.page_count as u64, Ordering::AcqRel);
        Backing::Pool { block: None }
    }
}

fn mode_of(backing: &Backing) -> RegionMode {
    match backing {
        Backing::Pool { .. } => RegionMode::Pool,
        Backing::Dedicated { .. } => RegionMode::Dedicated,
        Backing::Disabled => RegionMode::Disabled,
    }
}
