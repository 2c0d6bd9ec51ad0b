// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Timing knobs for the offline retry loop and the idle watchdog.

use std::time::Duration;

/// Blocking sleep source, injectable so tests control time.
pub trait Clock: Send + Sync {
    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Clock backed by [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Bounded retry policy for drawing a block from the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Allocation attempts before giving up.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Default attempt budget.
    pub const DEFAULT_ATTEMPTS: u32 = 20;
    /// Default pause between attempts.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: Self::DEFAULT_ATTEMPTS, interval: Self::DEFAULT_INTERVAL }
    }
}

/// Countdown armed when the last reference to the primary region is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchdogPolicy {
    /// Total idle time tolerated.
    pub countdown: Duration,
    /// Granularity at which cancellation is observed.
    pub tick: Duration,
}

impl WatchdogPolicy {
    /// Default idle budget.
    pub const DEFAULT_COUNTDOWN: Duration = Duration::from_millis(10_000);
    /// Default tick.
    pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

    /// Number of ticks in one countdown; at least one.
    pub fn ticks(&self) -> u32 {
        let tick = self.tick.as_millis().max(1);
        u32::try_from(self.countdown.as_millis() / tick).unwrap_or(u32::MAX).max(1)
    }
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self { countdown: Self::DEFAULT_COUNTDOWN, tick: Self::DEFAULT_TICK }
    }
}
