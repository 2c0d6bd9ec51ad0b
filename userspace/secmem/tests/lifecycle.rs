// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for the region lifecycle through the public handle
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//!
//! TEST_SCOPE:
//!   - Online/offline transition table and Busy rejection
//!   - Retry exhaustion against an always-out-of-bound pool
//!   - Dedicated reservations never touching the pool
//!   - Diagnostic commands and legacy control opcodes
//!   - Bootstrap from a TOML document over the real pool and section mapper
//!
//! TEST_SCENARIOS:
//!   - offline_scenario_returns_block(): 4 pages at 0x1000_0000 under 0xFFFF_FFFF
//!   - offline_scenario_exhausts_retries(): every block above 0x1000
//!   - busy_transitions_leave_state_unchanged(): wrong-state calls are rejected
//!   - dedicated_region_never_calls_allocator(): reservation lent and reclaimed
//!   - repeated_32mode_sets_exactly_4gib(): ceiling toggles only
//!   - diagnostic_commands_drive_transitions(): svp=off / svp=on
//!   - control_opcodes_map_to_references(): legacy ACQUIRE/RELEASE
//!   - bootstrap_over_section_mapper(): TOML config, real pool, split section fault

use std::sync::Arc;

use nexus_secmem::testing::{RecordingClock, RecordingMapper, RecordingReporter, ScriptedAllocator};
use nexus_secmem::{
    bootstrap_with, Config, ControlOp, Error, FaultKind, Layout, PhysAddr, PhysRange, Platform,
    RegionId, RegionMode, RegionSpec, RegionState, SecureMemory, Tunables, UPPER_LIMIT_32,
    UPPER_LIMIT_64,
};

struct Rig {
    allocator: Arc<ScriptedAllocator>,
    mapper: Arc<RecordingMapper>,
    clock: Arc<RecordingClock>,
    reporter: Arc<RecordingReporter>,
    memory: SecureMemory,
}

fn rig(allocator: ScriptedAllocator, layout: Layout) -> Rig {
    let allocator = Arc::new(allocator);
    let mapper = Arc::new(RecordingMapper::new());
    let clock = Arc::new(RecordingClock::new());
    let reporter = Arc::new(RecordingReporter::new());
    let platform = Platform::new(allocator.clone(), mapper.clone())
        .with_clock(clock.clone())
        .with_reporter(reporter.clone());
    let memory = SecureMemory::new(platform, layout, Tunables::default());
    Rig { allocator, mapper, clock, reporter, memory }
}

fn svp_pool(pages: usize) -> Layout {
    Layout { svp: RegionSpec::Pool { page_count: pages }, tui: RegionSpec::Disabled }
}

#[test]
fn offline_scenario_returns_block() {
    let rig = rig(ScriptedAllocator::always(PhysAddr::new(0x1000_0000)), svp_pool(4));
    let range = rig.memory.offline(RegionId::Svp, 0xFFFF_FFFF).expect("offline");
    assert_eq!(range, PhysRange::new(PhysAddr::new(0x1000_0000), 0x4000));
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::Off);
    assert_eq!(rig.allocator.requests(), vec![(4, 14)]);
    assert_eq!(rig.mapper.unmapped(), vec![range]);
    assert!(rig.memory.is_unmapped(RegionId::Svp));
}

#[test]
fn offline_scenario_exhausts_retries() {
    let rig = rig(ScriptedAllocator::always(PhysAddr::new(0x1000_0000)), svp_pool(4));
    let err = rig.memory.offline(RegionId::Svp, 0x1000).unwrap_err();
    assert_eq!(err, Error::Retry { region: RegionId::Svp, limit: 0x1000, attempts: 20 });
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::On);
    assert_eq!(rig.allocator.attempts(), 20);
    assert_eq!(rig.allocator.releases(), 20);
    assert_eq!(rig.clock.sleeps().len(), 19);
    assert_eq!(rig.memory.usage_pages(), 0);
    assert!(rig.mapper.unmapped().is_empty());
}

#[test]
fn busy_transitions_leave_state_unchanged() {
    let rig = rig(ScriptedAllocator::always(PhysAddr::new(0x1000_0000)), svp_pool(4));
    assert_eq!(
        rig.memory.online(RegionId::Svp),
        Err(Error::Busy { region: RegionId::Svp, state: RegionState::On })
    );
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::On);

    rig.memory.offline(RegionId::Svp, UPPER_LIMIT_64).expect("offline");
    assert_eq!(
        rig.memory.offline(RegionId::Svp, UPPER_LIMIT_64),
        Err(Error::Busy { region: RegionId::Svp, state: RegionState::Off })
    );
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::Off);
    assert_eq!(rig.allocator.attempts(), 1);

    assert!(matches!(rig.memory.offline(RegionId::Tui, UPPER_LIMIT_64), Err(Error::Busy { .. })));
    assert_eq!(rig.memory.state(RegionId::Tui), RegionState::Disabled);
}

#[test]
fn dedicated_region_never_calls_allocator() {
    let reservation = PhysRange::new(PhysAddr::new(0x7000_0000), 0x0100_0000);
    let layout = Layout { svp: RegionSpec::Disabled, tui: RegionSpec::Dedicated { range: reservation } };
    let rig = rig(ScriptedAllocator::exhausted(), layout);
    assert_eq!(rig.memory.mode(RegionId::Tui), RegionMode::Dedicated);

    assert_eq!(rig.memory.offline(RegionId::Tui, 0x1000), Ok(reservation));
    assert_eq!(rig.memory.snapshot().region(RegionId::Tui).base, reservation.base());
    rig.memory.online(RegionId::Tui).expect("online");
    assert_eq!(rig.memory.snapshot().region(RegionId::Tui).base, PhysAddr::new(0));

    assert_eq!(rig.allocator.attempts(), 0);
    assert_eq!(rig.allocator.releases(), 0);
    assert!(rig.mapper.mapped().is_empty());
    assert_eq!(rig.memory.usage_pages(), 0);
}

#[test]
fn repeated_32mode_sets_exactly_4gib() {
    let rig = rig(ScriptedAllocator::exhausted(), svp_pool(4));
    for _ in 0..3 {
        rig.memory.execute_command("32mode\n").expect("32mode");
        assert_eq!(rig.memory.upper_limit(), UPPER_LIMIT_32);
    }
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::On);
    assert_eq!(rig.allocator.attempts(), 0);
    rig.memory.execute_command("64mode").expect("64mode");
    assert_eq!(rig.memory.upper_limit(), UPPER_LIMIT_64);
}

#[test]
fn diagnostic_commands_drive_transitions() {
    let rig = rig(ScriptedAllocator::always(PhysAddr::new(0x4000_0000)), svp_pool(16));
    rig.memory.execute_command("svp=off\n").expect("svp=off");
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::Off);
    assert_eq!(
        rig.memory.execute_command("svp=off"),
        Err(Error::Busy { region: RegionId::Svp, state: RegionState::Off })
    );
    rig.memory.execute_command("svp=on").expect("svp=on");
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::On);
    assert_eq!(
        rig.memory.execute_command("svp=onward"),
        Err(Error::InvalidArgument("svp=onward".into()))
    );
}

#[test]
fn control_opcodes_map_to_references() {
    let rig = rig(ScriptedAllocator::exhausted(), svp_pool(4));
    rig.memory.control(ControlOp::Online.code()).expect("phased out online");
    rig.memory.control(ControlOp::Offline.code()).expect("phased out offline");
    assert_eq!(rig.memory.state(RegionId::Svp), RegionState::On);

    rig.memory.control(ControlOp::Acquire.code()).expect("acquire");
    rig.memory.control(ControlOp::Acquire.code()).expect("acquire");
    assert_eq!(rig.memory.reference_count(), 2);
    rig.memory.control(ControlOp::Release.code()).expect("release");
    assert_eq!(rig.memory.reference_count(), 1);
    assert!(!rig.memory.watchdog_running());

    assert_eq!(rig.memory.control(0xdead), Err(Error::NotSupported(0xdead)));
}

#[test]
fn bootstrap_over_section_mapper() {
    let config = Config::parse_str(
        r#"
        address_mode = "32bit"

        [pool]
        base = 0x4000_0000
        size = 0x2000_0000

        [svp]
        size = 0x0400_0000
        "#,
    )
    .expect("config");
    let reporter = Arc::new(RecordingReporter::new());
    let mapper = Arc::new(nexus_secmem::SectionMapper::new(config.memory_ranges()));
    let platform = Platform::new(
        Arc::new(nexus_secmem::PoolAllocator::new(config.pool.range())),
        mapper.clone(),
    )
    .with_clock(Arc::new(RecordingClock::new()))
    .with_reporter(reporter.clone());

    let boot = bootstrap_with(&config, platform);
    assert!(boot.issues.is_empty());
    let memory = boot.memory;
    assert_eq!(memory.upper_limit(), UPPER_LIMIT_32);
    assert_eq!(memory.mode(RegionId::Svp), RegionMode::Pool);
    assert_eq!(memory.state(RegionId::Tui), RegionState::Disabled);

    let range = memory.offline(RegionId::Svp, UPPER_LIMIT_64).expect("offline");
    assert!(range.base().is_aligned(64 * 1024 * 1024));
    assert!(range.end() <= UPPER_LIMIT_32);
    assert!(!mapper.is_mapped(range));
    memory.online(RegionId::Svp).expect("online");
    assert!(mapper.is_mapped(range));
    assert_eq!(memory.usage_pages(), 0);

    // A split section makes the next unmap fault; the block stays mapped.
    mapper.split_section(range.base());
    let again = memory.offline(RegionId::Svp, UPPER_LIMIT_64).expect("offline");
    assert_eq!(again, range);
    assert!(!memory.is_unmapped(RegionId::Svp));
    assert_eq!(reporter.kinds(), vec![FaultKind::UnmapFailed]);
    memory.online(RegionId::Svp).expect("online");
    assert_eq!(memory.usage_pages(), 0);
}

#[test]
fn bootstrap_sanity_failure_disables_pool_regions() {
    let config = Config::parse_str(
        "address_mode = \"32bit\"\n[pool]\nbase = 0xF000_0000\nsize = 0x2000_0000\n\
         [svp]\nsize = 0x1800_0000\n",
    )
    .expect("config");
    let reporter = Arc::new(RecordingReporter::new());
    let platform = Platform::new(
        Arc::new(ScriptedAllocator::exhausted()),
        Arc::new(RecordingMapper::new()),
    )
    .with_reporter(reporter.clone());
    let boot = bootstrap_with(&config, platform);
    assert_eq!(boot.issues.len(), 1);
    assert_eq!(boot.memory.state(RegionId::Svp), RegionState::Disabled);
    assert!(!boot.memory.is_initialized());
    assert_eq!(reporter.kinds(), vec![FaultKind::SanityFailed]);
}
