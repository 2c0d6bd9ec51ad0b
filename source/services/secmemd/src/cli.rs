//! User-facing CLI helpers shared with the daemon loop.

use std::io;
use std::path::PathBuf;

use clap::Parser;

use nexus_secmem::SecureMemory;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "secmemd", about = "Secure memory region lifecycle daemon")]
pub struct Args {
    /// Boot configuration (TOML).
    #[arg(long, short = 'c')]
    pub config: PathBuf,
    /// Run one command and exit instead of reading stdin.
    #[arg(long)]
    pub command: Option<String>,
}

/// Returns the usage string for the command surface.
pub fn help() -> &'static str {
    "secmemd commands: svp=on | svp=off | tui=on | tui=off | 32mode | 64mode | status | \
     ioc <opcode> | help"
}

/// Executes one command line and returns the reply text.
pub fn execute(memory: &SecureMemory, line: &str) -> String {
    let line = line.trim();
    if line == "help" {
        return help().to_string();
    }
    if line == "status" {
        return memory.snapshot().to_string().trim_end().to_string();
    }
    if let Some(raw) = line.strip_prefix("ioc ") {
        return match parse_opcode(raw.trim()) {
            Some(code) => reply(memory.control(code)),
            None => format!("error: invalid opcode {raw:?}"),
        };
    }
    reply(memory.execute_command(line))
}

/// Parses arguments, boots the subsystem and serves commands.
pub fn run() -> crate::Result<()> {
    let args = Args::parse();
    let boot = crate::load(&args.config)?;
    match args.command {
        Some(command) => {
            println!("{}", execute(&boot.memory, &command));
            Ok(())
        }
        None => crate::serve(&boot, io::stdin().lock(), io::stdout().lock()),
    }
}

fn reply(result: nexus_secmem::Result<()>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(err) => format!("error: {err}"),
    }
}

fn parse_opcode(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn help_lists_commands() {
        assert!(help().contains("svp=on"));
        assert!(help().contains("ioc"));
    }

    #[test]
    fn opcodes_parse_hex_and_decimal() {
        assert_eq!(parse_opcode("0x5303"), Some(0x5303));
        assert_eq!(parse_opcode("21251"), Some(21251));
        assert_eq!(parse_opcode("0xzz"), None);
    }

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
        let args = Args::try_parse_from(["secmemd", "--config", "boot.toml", "--command", "status"])
            .expect("parse");
        assert_eq!(args.command.as_deref(), Some("status"));
    }
}
