// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Idle watchdog for the primary region.
//!
//! External consumers take references on the primary region. When the last
//! one is dropped a single background countdown is armed; it stops quietly as
//! soon as a new reference shows up or the region is back `ON`, and files an
//! advisory report if neither happens before the countdown runs out.
//!
//! INVARIANTS:
//! - At most one countdown task is live; arming while it runs resets its
//!   tick counter in place.
//! - Every tick is decided under the slot lock, so a reset either lands
//!   before the decision or finds the task already retired and spawns anew.
//!
//! KNOWN HAZARD: repeated acquire/release pairs keep resetting the running
//! countdown, so a flapping consumer can postpone expiry indefinitely.

use core::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};
use parking_lot::Mutex;

use crate::policy::{Clock, WatchdogPolicy};

/// Why a countdown stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// A consumer took a new reference.
    ReferenceAcquired,
    /// The primary region reached `ON`.
    RegionOnline,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReferenceAcquired => "new request for the region",
            Self::RegionOnline => "region has come online",
        })
    }
}

/// How a countdown task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchdogOutcome {
    /// Stopped before the deadline; nothing reported.
    Cancelled(CancelReason),
    /// Deadline reached; a dump and an advisory report were emitted.
    Expired,
}

/// Result of an arm request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Armed {
    /// A new task was started.
    Spawned,
    /// The running task's countdown was reset.
    Reset,
    /// The task could not be created.
    Failed,
}

/// What the countdown watches.
pub(crate) trait Subject: Send + Sync + 'static {
    fn watchdog(&self) -> &Watchdog;
    fn clock(&self) -> &dyn Clock;
    fn primary_online(&self) -> bool;
    fn on_expired(&self);
}

#[derive(Default)]
struct Slot {
    generation: u64,
    running: bool,
    handle: Option<JoinHandle<WatchdogOutcome>>,
}

pub(crate) struct Watchdog {
    policy: WatchdogPolicy,
    references: AtomicUsize,
    countdown: AtomicU32,
    slot: Mutex<Slot>,
}

impl Watchdog {
    pub(crate) fn new(policy: WatchdogPolicy) -> Self {
        Self {
            policy,
            references: AtomicUsize::new(0),
            countdown: AtomicU32::new(0),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub(crate) fn acquire(&self) -> usize {
        self.references.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference and returns the remaining count.
    ///
    /// Returns `None`, leaving the count at zero, when nothing was held.
    pub(crate) fn release(&self) -> Option<usize> {
        match self.references.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            count.checked_sub(1)
        }) {
            Ok(previous) => Some(previous - 1),
            Err(_) => {
                error!("reference release without matching acquire");
                None
            }
        }
    }

    pub(crate) fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.slot.lock().running
    }

    pub(crate) fn remaining_ticks(&self) -> u32 {
        self.countdown.load(Ordering::Acquire)
    }

    /// Waits for the most recently started task and returns its outcome.
    pub(crate) fn join(&self) -> Option<WatchdogOutcome> {
        let handle = self.slot.lock().handle.take()?;
        handle.join().ok()
    }

    /// Starts the countdown, or resets it when a task is already live.
    pub(crate) fn arm<S: Subject>(subject: &Arc<S>) -> Armed {
        let watchdog = subject.watchdog();
        let ticks = watchdog.policy.ticks();
        let mut slot = watchdog.slot.lock();
        if slot.running {
            watchdog.countdown.store(ticks, Ordering::Release);
            info!("watchdog already running, countdown reset to {}", ticks);
            return Armed::Reset;
        }

        slot.generation += 1;
        slot.running = true;
        watchdog.countdown.store(ticks, Ordering::Release);
        let generation = slot.generation;
        let task_subject = Arc::clone(subject);
        match thread::Builder::new()
            .name("svp-online-watchdog".into())
            .spawn(move || countdown(task_subject, generation))
        {
            Ok(handle) => {
                slot.handle = Some(handle);
                Armed::Spawned
            }
            Err(err) => {
                slot.running = false;
                error!("failed to create watchdog task: {}", err);
                Armed::Failed
            }
        }
    }

    fn retire(slot: &mut Slot, generation: u64) {
        if slot.generation == generation {
            slot.running = false;
        }
    }
}

fn countdown<S: Subject>(subject: Arc<S>, generation: u64) -> WatchdogOutcome {
    let watchdog = subject.watchdog();
    info!(
        "[START COUNT DOWN]: {}ms/{}ms",
        watchdog.policy.countdown.as_millis(),
        watchdog.policy.tick.as_millis()
    );

    loop {
        subject.clock().sleep(watchdog.policy.tick);

        let mut slot = watchdog.slot.lock();
        let cancel = if watchdog.references() > 0 {
            Some(CancelReason::ReferenceAcquired)
        } else if subject.primary_online() {
            Some(CancelReason::RegionOnline)
        } else {
            None
        };
        if let Some(reason) = cancel {
            Watchdog::retire(&mut slot, generation);
            drop(slot);
            info!("[STOP COUNT DOWN]: {}", reason);
            return WatchdogOutcome::Cancelled(reason);
        }

        let left = watchdog.countdown.load(Ordering::Acquire).saturating_sub(1);
        watchdog.countdown.store(left, Ordering::Release);
        if left == 0 {
            Watchdog::retire(&mut slot, generation);
            break;
        }
        drop(slot);
        info!("[COUNT DOWN]: {}", left);
    }

    info!("[COUNT DOWN FAIL]");
    subject.on_expired();
    WatchdogOutcome::Expired
}
