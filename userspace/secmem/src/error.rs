// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by the region core.

use thiserror::Error;

use crate::region::{RegionId, RegionState};

/// Result alias for region operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Failures returned to callers of the region core.
///
/// Mapping faults are not part of this enum: they degrade the region and are
/// sent to the [`Reporter`](crate::report::Reporter) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The region is not in the state the transition requires. Nothing changed.
    #[error("{region} region busy in state {state}")]
    Busy {
        /// Region the call targeted.
        region: RegionId,
        /// State observed when the call was rejected.
        state: RegionState,
    },
    /// The pool could not supply a block below the ceiling; the region was reverted to `ON`.
    #[error("{region} region: no block below {limit:#x} after {attempts} attempts")]
    Retry {
        /// Region the call targeted.
        region: RegionId,
        /// Effective ceiling that was applied.
        limit: u64,
        /// Allocation attempts made.
        attempts: u32,
    },
    /// Diagnostic command was not recognised.
    #[error("invalid diagnostic command: {0:?}")]
    InvalidArgument(String),
    /// Legacy control opcode is unknown.
    #[error("unsupported control opcode {0:#x}")]
    NotSupported(u32),
}

/// Failures reported by a [`MappingController`](crate::mapping::MappingController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// Range is misaligned, empty or outside known memory.
    #[error("invalid mapping parameter")]
    InvalidParameter,
    /// Translation structures could not be updated for the range.
    #[error("mapping fault")]
    Fault,
}
