// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Legacy control opcodes.
//!
//! Opcodes use the classic `_IO(type, nr)` encoding with type `'S'`. The
//! online/offline opcodes are phased out and accepted as no-ops; only the
//! reference opcodes still do work.

use core::fmt;

use log::info;

use crate::context::SecureMemory;
use crate::error::{Error, Result};

const IOC_TYPE: u32 = b'S' as u32;

const fn io(nr: u32) -> u32 {
    (IOC_TYPE << 8) | nr
}

/// Decoded legacy control request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlOp {
    /// Phased out; accepted and ignored.
    Online,
    /// Phased out; accepted and ignored.
    Offline,
    /// Registers a consumer of the primary region.
    Acquire,
    /// Drops a consumer of the primary region.
    Release,
}

impl ControlOp {
    /// Every opcode, in numbering order.
    pub const ALL: [ControlOp; 4] =
        [ControlOp::Online, ControlOp::Offline, ControlOp::Acquire, ControlOp::Release];

    /// Raw opcode value.
    pub const fn code(self) -> u32 {
        match self {
            Self::Online => io(1),
            Self::Offline => io(2),
            Self::Acquire => io(3),
            Self::Release => io(4),
        }
    }

    /// Decodes a raw opcode.
    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.code() == code)
            .ok_or(Error::NotSupported(code))
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Online => "SVP_REGION_IOC_ONLINE",
            Self::Offline => "SVP_REGION_IOC_OFFLINE",
            Self::Acquire => "SVP_REGION_ACQUIRE",
            Self::Release => "SVP_REGION_RELEASE",
        }
    }
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl SecureMemory {
    /// Handles one legacy control request.
    pub fn control(&self, code: u32) -> Result<()> {
        info!("control cmd: {:#x}", code);
        match ControlOp::from_code(code)? {
            op @ (ControlOp::Online | ControlOp::Offline) => {
                info!("called phased out control: {}", op);
            }
            ControlOp::Acquire => self.acquire_reference(),
            ControlOp::Release => self.release_reference(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_use_io_encoding() {
        assert_eq!(ControlOp::Online.code(), 0x5301);
        assert_eq!(ControlOp::Release.code(), 0x5304);
        assert_eq!(ControlOp::from_code(0x5303), Ok(ControlOp::Acquire));
    }

    #[test]
    fn unknown_opcode_is_not_supported() {
        assert_eq!(ControlOp::from_code(0x5305), Err(Error::NotSupported(0x5305)));
        assert_eq!(ControlOp::from_code(0), Err(Error::NotSupported(0)));
    }
}
