// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot configuration and region bootstrap.
//!
//! The configuration is a TOML document. Only `[pool]` is required; every
//! other section falls back to the defaults shown below.
//!
//! ```toml
//! address_mode = "64bit"   # or "32bit"
//! mapping = "section"      # or "flat"
//!
//! [pool]
//! base = 0x4000_0000
//! size = 0x2000_0000
//!
//! [svp]
//! size = 0x0800_0000
//! iris_recognition_size = 0
//!
//! [tui.dedicated]
//! base = 0x7000_0000
//! size = 0x0100_0000
//!
//! [offline]
//! max_attempts = 20
//! interval_ms = 100
//!
//! [watchdog]
//! countdown_ms = 10000
//! tick_ms = 500
//! ```
//!
//! Bootstrap never fails on layout problems: an affected region is built
//! `DISABLED` and the problem is returned as a [`BootIssue`].

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::addr::{PhysAddr, PhysRange, PAGE_SHIFT, PAGE_SIZE, UPPER_LIMIT_32, UPPER_LIMIT_64};
use crate::allocator::PoolAllocator;
use crate::context::{Layout, Platform, SecureMemory, Tunables};
use crate::mapping::{FlatMapper, MappingController, SectionMapper};
use crate::policy::{RetryPolicy, WatchdogPolicy};
use crate::region::{RegionId, RegionSpec};
use crate::report::{FaultKind, FaultReport};

/// Errors raised while reading the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The document is not valid TOML or does not match the schema.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field holds a value the subsystem cannot use.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// Layout problem found at boot. The affected region is built `DISABLED`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootIssue {
    /// The region targets together do not fit in the pool.
    #[error("region targets need {total:#x} bytes but the pool holds {pool:#x}")]
    PoolTooSmall {
        /// Sum of both region targets.
        total: u64,
        /// Pool size.
        pool: u64,
    },
    /// A dedicated reservation is empty or not page aligned.
    #[error("{region} dedicated reservation {range} is not a page-aligned, nonempty range")]
    InvalidReservation {
        /// Region the reservation was configured for.
        region: RegionId,
        /// The rejected range.
        range: PhysRange,
    },
    /// Pool-backed regions could end above the ceiling.
    #[error("pool end {end:#x} for all targets exceeds upper limit {limit:#x}")]
    SanityFailed {
        /// `pool.base + total`.
        end: u64,
        /// Ceiling at boot.
        limit: u64,
    },
}

/// Physical-address ceiling selected at boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AddressMode {
    /// Blocks must end at or below 4 GiB.
    #[serde(rename = "32bit")]
    Bits32,
    /// Full physical range.
    #[default]
    #[serde(rename = "64bit")]
    Bits64,
}

impl AddressMode {
    /// Ceiling for this mode.
    pub const fn upper_limit(self) -> u64 {
        match self {
            Self::Bits32 => UPPER_LIMIT_32,
            Self::Bits64 => UPPER_LIMIT_64,
        }
    }
}

/// Mapping backend selected at boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    /// Section-mapped kernel linear map.
    #[default]
    Section,
    /// No section mappings; only cache flushes.
    Flat,
}

/// `[pool]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// First byte of the pool.
    pub base: u64,
    /// Pool size in bytes.
    pub size: u64,
}

impl PoolConfig {
    /// The pool as a range.
    pub fn range(&self) -> PhysRange {
        PhysRange::new(PhysAddr::new(self.base), self.size)
    }
}

/// `[<region>.dedicated]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservationConfig {
    /// First byte of the reservation.
    pub base: u64,
    /// Reservation size in bytes.
    pub size: u64,
}

impl ReservationConfig {
    /// The reservation as a range.
    pub fn range(&self) -> PhysRange {
        PhysRange::new(PhysAddr::new(self.base), self.size)
    }
}

/// `[svp]` and `[tui]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// Target size in bytes when pool-backed.
    pub size: u64,
    /// Extra target used by iris recognition; the larger one wins.
    pub iris_recognition_size: u64,
    /// Fixed reservation; takes precedence over the pool.
    pub dedicated: Option<ReservationConfig>,
}

impl RegionConfig {
    /// Bytes to draw from the pool per offline.
    pub fn target(&self) -> u64 {
        self.size.max(self.iris_recognition_size)
    }
}

/// `[offline]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OfflineConfig {
    /// Allocation attempts per offline.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub interval_ms: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self { max_attempts: policy.max_attempts, interval_ms: policy.interval.as_millis() as u64 }
    }
}

/// `[watchdog]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Idle budget.
    pub countdown_ms: u64,
    /// Tick length.
    pub tick_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            countdown_ms: WatchdogPolicy::DEFAULT_COUNTDOWN.as_millis() as u64,
            tick_ms: WatchdogPolicy::DEFAULT_TICK.as_millis() as u64,
        }
    }
}

/// Whole boot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Initial ceiling.
    #[serde(default)]
    pub address_mode: AddressMode,
    /// Mapping backend.
    #[serde(default)]
    pub mapping: MappingKind,
    /// Shared pool window.
    pub pool: PoolConfig,
    /// Primary region.
    #[serde(default)]
    pub svp: RegionConfig,
    /// Trusted UI region. `iris_recognition_size` is ignored here.
    #[serde(default)]
    pub tui: RegionConfig,
    /// Retry budget.
    #[serde(default)]
    pub offline: OfflineConfig,
    /// Idle watchdog.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn parse_str(input: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.size == 0 {
            return Err(ConfigError::InvalidField {
                field: "pool.size",
                reason: "must be nonzero".into(),
            });
        }
        if !PhysAddr::new(self.pool.base).is_aligned(PAGE_SIZE) {
            return Err(ConfigError::InvalidField {
                field: "pool.base",
                reason: format!("{:#x} is not page aligned", self.pool.base),
            });
        }
        if self.pool.base.checked_add(self.pool.size).is_none() {
            return Err(ConfigError::InvalidField {
                field: "pool",
                reason: "range wraps the address space".into(),
            });
        }
        if self.offline.max_attempts == 0 {
            return Err(ConfigError::InvalidField {
                field: "offline.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.watchdog.tick_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "watchdog.tick_ms",
                reason: "must be nonzero".into(),
            });
        }
        Ok(())
    }

    /// Region configuration for one slot.
    pub fn region(&self, id: RegionId) -> &RegionConfig {
        match id {
            RegionId::Svp => &self.svp,
            RegionId::Tui => &self.tui,
        }
    }

    /// Pool-backed target of one slot, in bytes.
    pub fn target(&self, id: RegionId) -> u64 {
        match id {
            RegionId::Svp => self.svp.target(),
            RegionId::Tui => self.tui.size,
        }
    }

    /// Sum of both targets.
    pub fn total_target(&self) -> u64 {
        self.target(RegionId::Svp).saturating_add(self.target(RegionId::Tui))
    }

    /// Runtime knobs.
    pub fn tunables(&self) -> Tunables {
        Tunables {
            upper_limit: self.address_mode.upper_limit(),
            retry: RetryPolicy {
                max_attempts: self.offline.max_attempts,
                interval: Duration::from_millis(self.offline.interval_ms),
            },
            watchdog: WatchdogPolicy {
                countdown: Duration::from_millis(self.watchdog.countdown_ms),
                tick: Duration::from_millis(self.watchdog.tick_ms),
            },
        }
    }

    /// Physical memory the mapping backend knows about.
    pub fn memory_ranges(&self) -> Vec<PhysRange> {
        let mut ranges = vec![self.pool.range()];
        ranges.extend(
            RegionId::ALL.iter().filter_map(|id| self.region(*id).dedicated.map(|d| d.range())),
        );
        ranges
    }

    /// Default platform for this configuration: a bitmap pool over `[pool]`
    /// and the selected mapping backend.
    pub fn platform(&self) -> Platform {
        let mapper: Arc<dyn MappingController> = match self.mapping {
            MappingKind::Section => Arc::new(SectionMapper::new(self.memory_ranges())),
            MappingKind::Flat => Arc::new(FlatMapper::new()),
        };
        Platform::new(Arc::new(PoolAllocator::new(self.pool.range())), mapper)
    }

    /// Region layout plus every problem found while deriving it.
    ///
    /// Sanity failures are not reported here; see [`bootstrap_with`].
    pub fn layout(&self) -> (Layout, Vec<BootIssue>) {
        let mut issues = Vec::new();
        let total = self.total_target();
        let pool_fits = total <= self.pool.size;
        if !pool_fits {
            issues.push(BootIssue::PoolTooSmall { total, pool: self.pool.size });
        }

        let mut layout = Layout::disabled();
        for id in RegionId::ALL {
            let spec = match self.region(id).dedicated {
                Some(reservation) => {
                    let range = reservation.range();
                    if valid_reservation(range) {
                        RegionSpec::Dedicated { range }
                    } else {
                        issues.push(BootIssue::InvalidReservation { region: id, range });
                        RegionSpec::Disabled
                    }
                }
                None if pool_fits && self.target(id) >= PAGE_SIZE => {
                    RegionSpec::Pool { page_count: (self.target(id) >> PAGE_SHIFT) as usize }
                }
                None => RegionSpec::Disabled,
            };
            match id {
                RegionId::Svp => layout.svp = spec,
                RegionId::Tui => layout.tui = spec,
            }
        }
        (layout, issues)
    }

    /// `pool.base + total` when it lies above the boot ceiling and the
    /// layout depends on the pool alone.
    fn sanity_violation(&self, layout: &Layout) -> Option<BootIssue> {
        let specs = [layout.svp, layout.tui];
        let dedicated = specs.iter().any(|spec| matches!(spec, RegionSpec::Dedicated { .. }));
        let pooled = specs.iter().any(|spec| matches!(spec, RegionSpec::Pool { .. }));
        if dedicated || !pooled {
            return None;
        }
        let end = self.pool.base.saturating_add(self.total_target());
        let limit = self.address_mode.upper_limit();
        (end > limit).then_some(BootIssue::SanityFailed { end, limit })
    }
}

fn valid_reservation(range: PhysRange) -> bool {
    !range.is_empty() && range.base().is_aligned(PAGE_SIZE) && range.size() % PAGE_SIZE == 0
}

/// Built subsystem plus the layout problems found on the way.
pub struct Boot {
    /// The subsystem handle.
    pub memory: SecureMemory,
    /// Problems that left regions disabled.
    pub issues: Vec<BootIssue>,
}

/// Builds the subsystem over the default platform for `config`.
pub fn bootstrap(config: &Config) -> Boot {
    bootstrap_with(config, config.platform())
}

/// Builds the subsystem over `platform`.
///
/// A sanity failure is also sent to the platform reporter and disables every
/// pool-backed region.
pub fn bootstrap_with(config: &Config, platform: Platform) -> Boot {
    info!(
        "pool: {}, svp target: {:#x}, tui target: {:#x}",
        config.pool.range(),
        config.target(RegionId::Svp),
        config.target(RegionId::Tui)
    );
    let (mut layout, mut issues) = config.layout();
    if let Some(issue) = config.sanity_violation(&layout) {
        platform.reporter.report(&FaultReport::new(FaultKind::SanityFailed, issue.to_string()));
        layout = Layout::disabled();
        issues.push(issue);
    }
    for issue in &issues {
        warn!("boot: {}", issue);
    }
    if issues.iter().any(|issue| matches!(issue, BootIssue::SanityFailed { .. })) {
        error!("sanity fail");
    } else {
        info!("[PASS]: sanity");
    }
    Boot { memory: SecureMemory::new(platform, layout, config.tunables()), issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "[pool]\nbase = 0x4000_0000\nsize = 0x2000_0000\n";

    #[test]
    fn defaults_fill_optional_sections() {
        let config = Config::parse_str(BASE).expect("parse");
        assert_eq!(config.address_mode, AddressMode::Bits64);
        assert_eq!(config.mapping, MappingKind::Section);
        assert_eq!(config.offline, OfflineConfig { max_attempts: 20, interval_ms: 100 });
        assert_eq!(config.watchdog, WatchdogConfig { countdown_ms: 10_000, tick_ms: 500 });
        assert_eq!(config.tunables().watchdog.ticks(), 20);
    }

    #[test]
    fn missing_pool_is_a_parse_error() {
        let err = Config::parse_str("address_mode = \"32bit\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::parse_str(&format!("{BASE}[svp]\nsize = 1\nbogus = 2\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_retry_budget_is_invalid() {
        let err = Config::parse_str(&format!("{BASE}[offline]\nmax_attempts = 0\n")).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidField {
                field: "offline.max_attempts",
                reason: "must be at least 1".into()
            }
        );
    }

    #[test]
    fn unaligned_pool_base_is_invalid() {
        let err =
            Config::parse_str("[pool]\nbase = 0x4000_0800\nsize = 0x2000_0000\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidField {
                field: "pool.base",
                reason: "0x40000800 is not page aligned".into()
            }
        );
    }

    #[test]
    fn iris_size_raises_svp_target() {
        let config = Config::parse_str(&format!(
            "{BASE}[svp]\nsize = 0x0400_0000\niris_recognition_size = 0x0800_0000\n"
        ))
        .expect("parse");
        let (layout, issues) = config.layout();
        assert!(issues.is_empty());
        assert_eq!(layout.svp, RegionSpec::Pool { page_count: 0x8000 });
        assert_eq!(layout.tui, RegionSpec::Disabled);
    }

    #[test]
    fn oversized_targets_disable_pool_regions_only() {
        let config = Config::parse_str(&format!(
            "{BASE}[svp]\nsize = 0x1800_0000\n[tui]\nsize = 0x1000_0000\n\
             [tui.dedicated]\nbase = 0x7000_0000\nsize = 0x0100_0000\n"
        ))
        .expect("parse");
        let (layout, issues) = config.layout();
        assert_eq!(issues, vec![BootIssue::PoolTooSmall { total: 0x2800_0000, pool: 0x2000_0000 }]);
        assert_eq!(layout.svp, RegionSpec::Disabled);
        assert!(matches!(layout.tui, RegionSpec::Dedicated { .. }));
    }

    #[test]
    fn misaligned_reservation_disables_region() {
        let config = Config::parse_str(&format!(
            "{BASE}[svp.dedicated]\nbase = 0x7000_0800\nsize = 0x0100_0000\n"
        ))
        .expect("parse");
        let (layout, issues) = config.layout();
        assert_eq!(layout.svp, RegionSpec::Disabled);
        assert!(matches!(issues[0], BootIssue::InvalidReservation { region: RegionId::Svp, .. }));
    }

    #[test]
    fn pool_above_ceiling_fails_sanity() {
        let config = Config::parse_str(
            "address_mode = \"32bit\"\n[pool]\nbase = 0xF000_0000\nsize = 0x2000_0000\n\
             [svp]\nsize = 0x1800_0000\n",
        )
        .expect("parse");
        let (layout, _) = config.layout();
        assert_eq!(
            config.sanity_violation(&layout),
            Some(BootIssue::SanityFailed { end: 0x1_0800_0000, limit: UPPER_LIMIT_32 })
        );
    }
}
