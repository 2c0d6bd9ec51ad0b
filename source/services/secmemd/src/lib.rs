// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Host daemon for the secure memory region lifecycle
//! OWNERS: @runtime
//! PUBLIC API: load, serve, execute, help, run
//! DEPENDS_ON: nexus_secmem, clap (arguments), env_logger (binary), log, thiserror
//!
//! The daemon boots the subsystem from a TOML file and then answers one
//! command per input line: the diagnostic tokens (`svp=on`, `32mode`, ...),
//! `status`, `ioc <opcode>` and `help`.

pub mod cli;
pub use cli::{execute, help, run, Args};

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use nexus_secmem::{bootstrap, Boot, Config, ConfigError};

/// Result alias used by the daemon.
pub type Result<T> = core::result::Result<T, DaemonError>;

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    ReadConfig {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The configuration document was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Reading commands or writing replies failed.
    #[error("command stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads `path` and boots the subsystem. Layout issues are logged, not fatal.
pub fn load(path: &Path) -> Result<Boot> {
    let text = fs::read_to_string(path)
        .map_err(|source| DaemonError::ReadConfig { path: path.to_path_buf(), source })?;
    let config = Config::parse_str(&text)?;
    let boot = bootstrap(&config);
    for issue in &boot.issues {
        warn!("{}: {}", path.display(), issue);
    }
    info!("secmemd: booted from {}", path.display());
    Ok(boot)
}

/// Answers every line of `input` on `output` until end of input.
pub fn serve(boot: &Boot, input: impl BufRead, mut output: impl Write) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        writeln!(output, "{}", execute(&boot.memory, &line))?;
        output.flush()?;
    }
    Ok(())
}
