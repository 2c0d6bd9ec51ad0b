// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic platform doubles for host tests.
//!
//! Every double records what it was asked to do so tests can assert on the
//! exact sequence of pool, mapping, clock and report traffic.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::addr::{PhysAddr, PhysRange};
use crate::allocator::{Block, ContiguousAllocator, PoolTag};
use crate::error::MapError;
use crate::mapping::MappingController;
use crate::policy::Clock;
use crate::report::{FaultKind, FaultReport, Reporter};

enum Script {
    Always(PhysAddr),
    Queue(VecDeque<Option<PhysAddr>>),
}

#[derive(Default)]
struct AllocatorLog {
    requests: Vec<(usize, u32)>,
    releases: Vec<PhysRange>,
}

/// Allocator that answers from a script instead of tracking a pool.
pub struct ScriptedAllocator {
    script: Mutex<Script>,
    extent: PhysRange,
    log: Mutex<AllocatorLog>,
}

impl ScriptedAllocator {
    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            extent: PhysRange::new(PhysAddr::new(0), u64::MAX),
            log: Mutex::new(AllocatorLog::default()),
        }
    }

    /// Every request succeeds at `base`.
    pub fn always(base: PhysAddr) -> Self {
        Self::with_script(Script::Always(base))
    }

    /// Every request fails.
    pub fn exhausted() -> Self {
        Self::with_script(Script::Queue(VecDeque::new()))
    }

    /// Answers requests in order; `None` entries and an empty queue fail.
    pub fn sequence(answers: impl IntoIterator<Item = Option<PhysAddr>>) -> Self {
        Self::with_script(Script::Queue(answers.into_iter().collect()))
    }

    /// Overrides the reported pool extent.
    pub fn with_extent(mut self, extent: PhysRange) -> Self {
        self.extent = extent;
        self
    }

    /// Number of allocation attempts seen.
    pub fn attempts(&self) -> usize {
        self.log.lock().requests.len()
    }

    /// `(page_count, align_order)` of every attempt, in order.
    pub fn requests(&self) -> Vec<(usize, u32)> {
        self.log.lock().requests.clone()
    }

    /// Number of blocks handed back.
    pub fn releases(&self) -> usize {
        self.log.lock().releases.len()
    }

    /// Ranges of the blocks handed back, in order.
    pub fn released(&self) -> Vec<PhysRange> {
        self.log.lock().releases.clone()
    }
}

impl ContiguousAllocator for ScriptedAllocator {
    fn allocate(&self, page_count: usize, align_order: u32, _tag: PoolTag) -> Option<Block> {
        self.log.lock().requests.push((page_count, align_order));
        let base = match &mut *self.script.lock() {
            Script::Always(base) => Some(*base),
            Script::Queue(queue) => queue.pop_front().flatten(),
        };
        base.map(|base| Block::from_raw(base, page_count))
    }

    fn release(&self, block: Block, _page_count: usize) {
        self.log.lock().releases.push(block.range());
    }

    fn extent(&self) -> PhysRange {
        self.extent
    }
}

#[derive(Default)]
struct MapperState {
    fail_unmap: bool,
    fail_map: bool,
    unmapped: Vec<PhysRange>,
    mapped: Vec<PhysRange>,
}

/// Mapper that records successful calls and fails on demand.
#[derive(Default)]
pub struct RecordingMapper {
    state: Mutex<MapperState>,
}

impl RecordingMapper {
    /// Creates a mapper where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent unmaps fail with [`MapError::Fault`].
    pub fn fail_unmap(&self, fail: bool) {
        self.state.lock().fail_unmap = fail;
    }

    /// Makes subsequent maps fail with [`MapError::Fault`].
    pub fn fail_map(&self, fail: bool) {
        self.state.lock().fail_map = fail;
    }

    /// Ranges successfully unmapped, in order.
    pub fn unmapped(&self) -> Vec<PhysRange> {
        self.state.lock().unmapped.clone()
    }

    /// Ranges successfully mapped, in order.
    pub fn mapped(&self) -> Vec<PhysRange> {
        self.state.lock().mapped.clone()
    }
}

impl MappingController for RecordingMapper {
    fn unmap(&self, range: PhysRange) -> Result<(), MapError> {
        let mut state = self.state.lock();
        if state.fail_unmap {
            return Err(MapError::Fault);
        }
        state.unmapped.push(range);
        Ok(())
    }

    fn map(&self, range: PhysRange) -> Result<(), MapError> {
        let mut state = self.state.lock();
        if state.fail_map {
            return Err(MapError::Fault);
        }
        state.mapped.push(range);
        Ok(())
    }
}

/// Clock that returns immediately and records requested sleeps.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    /// Creates a clock with no recorded sleeps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for RecordingClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

#[derive(Default)]
struct Gate {
    permits: u64,
    sleepers: usize,
    slept: u64,
    open: bool,
}

/// Clock whose sleeps block until the test releases them.
///
/// Each [`GatedClock::advance`] permit lets exactly one sleep return, which
/// makes watchdog ticks observable one at a time.
#[derive(Default)]
pub struct GatedClock {
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl GatedClock {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `ticks` more sleeps return.
    pub fn advance(&self, ticks: u64) {
        self.gate.lock().permits += ticks;
        self.changed.notify_all();
    }

    /// Lets every current and future sleep return at once.
    pub fn open(&self) {
        self.gate.lock().open = true;
        self.changed.notify_all();
    }

    /// Blocks until all permits are consumed and a sleeper is parked again.
    pub fn wait_for_sleeper(&self) {
        let mut gate = self.gate.lock();
        while gate.permits > 0 || gate.sleepers == 0 {
            self.changed.wait(&mut gate);
        }
    }

    /// Number of sleeps that have returned.
    pub fn slept(&self) -> u64 {
        self.gate.lock().slept
    }
}

impl Clock for GatedClock {
    fn sleep(&self, _duration: Duration) {
        let mut gate = self.gate.lock();
        gate.sleepers += 1;
        self.changed.notify_all();
        while gate.permits == 0 && !gate.open {
            self.changed.wait(&mut gate);
        }
        if !gate.open {
            gate.permits -= 1;
        }
        gate.sleepers -= 1;
        gate.slept += 1;
        self.changed.notify_all();
    }
}

/// Reporter that keeps every report.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<FaultReport>>,
}

impl RecordingReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report, in order.
    pub fn reports(&self) -> Vec<FaultReport> {
        self.reports.lock().clone()
    }

    /// Kind of every report, in order.
    pub fn kinds(&self) -> Vec<FaultKind> {
        self.reports.lock().iter().map(|report| report.kind).collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, report: &FaultReport) {
        self.reports.lock().push(report.clone());
    }
}
