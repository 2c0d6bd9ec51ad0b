// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(missing_docs)]

//! CONTEXT: Runtime lifecycle of the secure (svp) and trusted UI (tui) memory regions
//! OWNERS: @runtime
//! PUBLIC API: SecureMemory (online/offline, references, snapshot), DebugCommand, ControlOp,
//!   Config/bootstrap, ContiguousAllocator + PoolAllocator, MappingController + SectionMapper/FlatMapper
//! DEPENDS_ON: parking_lot (region/slot locks), log, thiserror, serde + toml (boot config), bitflags
//! INVARIANTS: A pool-backed region owns a block exactly while OFF; every accepted block ends at or
//!   below min(global ceiling, caller ceiling); at most one idle watchdog task is live
//! TEST_COVERAGE: unit tests per module; tests/lifecycle.rs, tests/watchdog.rs, tests/bounds.rs
//!
//! Each region toggles between `ON` (memory usable by the kernel) and `OFF`
//! (memory held for the secure world and, where the mapping allows it,
//! unmapped from the normal world). Pool-backed regions draw a fresh aligned
//! block from a shared contiguous pool on every offline; dedicated regions
//! own a fixed reservation. Mapping faults never fail a transition: they
//! degrade the region and are sent to a [`Reporter`].

pub mod addr;
pub mod allocator;
pub mod command;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod mapping;
pub mod policy;
pub mod region;
pub mod report;
pub mod snapshot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod watchdog;

pub use addr::{PhysAddr, PhysRange, PAGE_SIZE, SECTION_SIZE, UPPER_LIMIT_32, UPPER_LIMIT_64};
pub use allocator::{Block, ContiguousAllocator, PoolAllocator, PoolTag};
pub use command::DebugCommand;
pub use config::{bootstrap, bootstrap_with, Boot, BootIssue, Config, ConfigError};
pub use context::{Layout, Platform, SecureMemory, Tunables};
pub use control::ControlOp;
pub use error::{Error, MapError, Result};
pub use mapping::{FlatMapper, MappingController, SectionMapper};
pub use policy::{Clock, RetryPolicy, SystemClock, WatchdogPolicy};
pub use region::{RegionId, RegionMode, RegionSnapshot, RegionSpec, RegionState};
pub use report::{FaultKind, FaultReport, LogReporter, Reporter};
pub use snapshot::Snapshot;
pub use watchdog::{CancelReason, WatchdogOutcome};
