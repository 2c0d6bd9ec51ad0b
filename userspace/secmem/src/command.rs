// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic command surface.
//!
//! Accepts exactly `svp=on`, `svp=off`, `tui=on`, `tui=off`, `32mode` and
//! `64mode`. Surrounding whitespace is ignored; anything else is rejected.

use core::fmt;
use core::str::FromStr;

use log::{error, info};

use crate::addr::{UPPER_LIMIT_32, UPPER_LIMIT_64};
use crate::context::SecureMemory;
use crate::error::{Error, Result};
use crate::region::RegionId;

/// One parsed diagnostic command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugCommand {
    /// Bring a region online.
    Online(RegionId),
    /// Take a region offline under the global ceiling.
    Offline(RegionId),
    /// Restrict the ceiling to the 4 GiB boundary.
    Mode32,
    /// Lift the ceiling to the full physical range.
    Mode64,
}

impl DebugCommand {
    /// Every command, in help order.
    pub const ALL: [DebugCommand; 6] = [
        DebugCommand::Online(RegionId::Svp),
        DebugCommand::Offline(RegionId::Svp),
        DebugCommand::Online(RegionId::Tui),
        DebugCommand::Offline(RegionId::Tui),
        DebugCommand::Mode32,
        DebugCommand::Mode64,
    ];

    /// Runs the command against `memory`.
    ///
    /// Transition failures are logged and returned.
    pub fn execute(self, memory: &SecureMemory) -> Result<()> {
        info!("debug command: {}", self);
        let result = match self {
            Self::Online(id) => memory.online(id),
            Self::Offline(id) => memory.offline(id, UPPER_LIMIT_64).map(|range| {
                info!("{} reserved {}", id, range);
            }),
            Self::Mode32 => {
                memory.set_upper_limit(UPPER_LIMIT_32);
                Ok(())
            }
            Self::Mode64 => {
                memory.set_upper_limit(UPPER_LIMIT_64);
                Ok(())
            }
        };
        if let Err(err) = &result {
            error!("debug command {} failed: {}", self, err);
        }
        result
    }
}

impl FromStr for DebugCommand {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let token = input.trim();
        Self::ALL
            .into_iter()
            .find(|command| command.to_string() == token)
            .ok_or_else(|| Error::InvalidArgument(token.to_string()))
    }
}

impl fmt::Display for DebugCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online(id) => write!(f, "{}=on", id),
            Self::Offline(id) => write!(f, "{}=off", id),
            Self::Mode32 => f.write_str("32mode"),
            Self::Mode64 => f.write_str("64mode"),
        }
    }
}

impl SecureMemory {
    /// Parses and runs one diagnostic command line.
    pub fn execute_command(&self, line: &str) -> Result<()> {
        line.parse::<DebugCommand>()?.execute(self)
    }
}
