use super::Fakes;
use crate::dependency_watcher::{BusScope, DependencyChange, DependencyWatcher};
use crate::events::Event;
use crate::runtime_info::RuntimeInfo;
use crate::signal_handler::ChildTermination;
use crate::units::{
    MAX_CRASH_RESPAWNS, ProcessState, UnitDescriptor, UnitKind, UnitRegistry, UnitSource,
    UnitSupervisor, UnitType,
};
use nix::sys::signal::Signal;
use std::path::PathBuf;

const SESSION_DEP: &str = "org.lemuri.Notifications";
const SYSTEM_DEP: &str = "org.freedesktop.NetworkManager";

fn service_unit(
    exec: &str,
    session_requires: &[&str],
    system_requires: &[&str],
) -> UnitSource {
    UnitSource::FileDescriptor {
        path: PathBuf::from("/etc/lemuri/lemuri.d/services/applet.desktop"),
        descriptor: UnitDescriptor {
            exec: exec.to_owned(),
            session_requires: session_requires.iter().map(|s| (*s).to_owned()).collect(),
            system_requires: system_requires.iter().map(|s| (*s).to_owned()).collect(),
            enabled: true,
            unit_type: Some(UnitType::Service),
            ..UnitDescriptor::default()
        },
    }
}

fn supervisor(source: UnitSource, flag: bool, run_info: &mut RuntimeInfo) -> UnitSupervisor {
    UnitSupervisor::new(UnitKind::Service, source, flag, run_info)
}

/// Acknowledges the launch the supervisor posted, like the event loop would.
fn ack_started(unit: &mut UnitSupervisor, run_info: &mut RuntimeInfo) -> bool {
    match run_info.pending.pop_front() {
        Some(Event::ProcessStarted { pid, .. }) => unit.on_process_started(pid, run_info),
        other => panic!("expected a ProcessStarted event, got {other:?}"),
    }
}

#[test]
fn test_start_without_dependencies() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet -q", &[], &[]), false, &mut run_info);

    assert_eq!(unit.state(), ProcessState::NotRunning);
    assert_eq!(fakes.bus.borrow().units.len(), 1);
    assert_eq!(fakes.bus.borrow().units[0].1, "/org/lemuri/service_units/applet");
    assert_eq!(fakes.bus.borrow().units[0].2, "applet.desktop");

    unit.start(&mut run_info);
    assert_eq!(unit.state(), ProcessState::Starting);
    assert_eq!(fakes.launcher.borrow().spawned_cmds(), vec!["/usr/bin/applet"]);
    assert_eq!(fakes.launcher.borrow().spawned[0].args, vec!["-q"]);

    assert!(ack_started(&mut unit, &mut run_info));
    assert_eq!(unit.state(), ProcessState::Running);
    assert_eq!(
        fakes.bus.borrow().states_of("/org/lemuri/service_units/applet"),
        vec![ProcessState::Starting, ProcessState::Running]
    );

    // already running, nothing to do
    unit.start(&mut run_info);
    assert_eq!(fakes.spawn_count(), 1);
    assert!(run_info.pending.is_empty());
}

#[test]
fn test_disabled_unit_is_still_started() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut source = service_unit("/usr/bin/applet", &[], &[]);
    if let UnitSource::FileDescriptor { descriptor, .. } = &mut source {
        descriptor.enabled = false;
    }
    let mut unit = supervisor(source, false, &mut run_info);
    unit.start(&mut run_info);
    assert_eq!(fakes.spawn_count(), 1);
}

#[test]
fn test_system_dependency_retries_start() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(
        service_unit("/usr/bin/applet", &[SESSION_DEP], &[SYSTEM_DEP]),
        false,
        &mut run_info,
    );
    assert_eq!(
        fakes.bus.borrow().watches,
        vec![
            (BusScope::Session, SESSION_DEP.to_owned()),
            (BusScope::System, SYSTEM_DEP.to_owned())
        ]
    );

    unit.start(&mut run_info);
    assert_eq!(fakes.spawn_count(), 0);

    // a session service appearing does not retry the start
    unit.on_dependency_changed(BusScope::Session, SESSION_DEP, true, &mut run_info);
    assert!(!unit.dependencies_satisfied());
    assert_eq!(fakes.spawn_count(), 0);

    unit.on_dependency_changed(BusScope::System, SYSTEM_DEP, true, &mut run_info);
    assert!(unit.dependencies_satisfied());
    assert_eq!(fakes.spawn_count(), 1);
    assert_eq!(unit.state(), ProcessState::Starting);
}

#[test]
fn test_session_dependency_last_needs_explicit_start() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(
        service_unit("/usr/bin/applet", &[SESSION_DEP], &[SYSTEM_DEP]),
        false,
        &mut run_info,
    );

    unit.on_dependency_changed(BusScope::System, SYSTEM_DEP, true, &mut run_info);
    assert_eq!(fakes.spawn_count(), 0);
    unit.on_dependency_changed(BusScope::Session, SESSION_DEP, true, &mut run_info);
    assert!(unit.dependencies_satisfied());
    assert_eq!(fakes.spawn_count(), 0);
    assert_eq!(unit.state(), ProcessState::NotRunning);

    unit.start(&mut run_info);
    assert_eq!(fakes.spawn_count(), 1);
}

#[test]
fn test_dependencies_owned_at_watch_time() {
    let fakes = Fakes::new();
    fakes.own(BusScope::Session, SESSION_DEP);
    fakes.own(BusScope::System, SYSTEM_DEP);
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(
        service_unit("/usr/bin/applet", &[SESSION_DEP], &[SYSTEM_DEP]),
        false,
        &mut run_info,
    );
    assert!(unit.dependencies_satisfied());
    unit.start(&mut run_info);
    assert_eq!(fakes.spawn_count(), 1);
}

#[test]
fn test_unrelated_and_duplicate_owner_changes() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(
        service_unit("/usr/bin/applet", &[], &[SYSTEM_DEP]),
        false,
        &mut run_info,
    );

    unit.on_dependency_changed(BusScope::System, "org.example.Other", true, &mut run_info);
    unit.on_dependency_changed(BusScope::Session, SYSTEM_DEP, true, &mut run_info);
    assert_eq!(fakes.spawn_count(), 0);

    unit.on_dependency_changed(BusScope::System, SYSTEM_DEP, true, &mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    unit.on_dependency_changed(BusScope::System, SYSTEM_DEP, true, &mut run_info);
    assert_eq!(fakes.spawn_count(), 1);
    assert_eq!(unit.state(), ProcessState::Running);
}

#[test]
fn test_crash_respawn_is_bounded() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);

    for _ in 0..=MAX_CRASH_RESPAWNS {
        assert!(ack_started(&mut unit, &mut run_info));
        let pid = unit.pid().unwrap();
        unit.on_process_exited(pid, ChildTermination::Signal(Signal::SIGSEGV), &mut run_info);
    }

    assert_eq!(fakes.spawn_count(), 1 + MAX_CRASH_RESPAWNS as usize);
    assert_eq!(unit.crash_count(), MAX_CRASH_RESPAWNS);
    assert_eq!(unit.state(), ProcessState::NotRunning);
    assert_eq!(unit.pid(), None);
    assert!(run_info.pending.is_empty());
}

#[test]
fn test_normal_exit_is_not_respawned() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));

    let pid = unit.pid().unwrap();
    unit.on_process_exited(pid, ChildTermination::Exit(1), &mut run_info);
    assert_eq!(unit.state(), ProcessState::NotRunning);
    assert_eq!(unit.crash_count(), 0);
    assert_eq!(fakes.spawn_count(), 1);
    assert!(run_info.pending.is_empty());
}

#[test]
fn test_stop_sends_sigterm_once() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);

    // nothing to stop yet
    unit.stop(&mut run_info);
    assert!(fakes.launcher.borrow().terminated.is_empty());

    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    let pid = unit.pid().unwrap();

    unit.stop(&mut run_info);
    assert_eq!(unit.state(), ProcessState::Stopping);
    unit.stop(&mut run_info);
    assert_eq!(fakes.launcher.borrow().terminated, vec![pid]);

    // dying from our SIGTERM is not a crash
    unit.on_process_exited(pid, ChildTermination::Signal(Signal::SIGTERM), &mut run_info);
    assert_eq!(unit.state(), ProcessState::NotRunning);
    assert_eq!(unit.crash_count(), 0);
    assert_eq!(fakes.spawn_count(), 1);

    // a later crash is counted again
    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    let pid = unit.pid().unwrap();
    unit.on_process_exited(pid, ChildTermination::Signal(Signal::SIGABRT), &mut run_info);
    assert_eq!(unit.crash_count(), 1);
    assert_eq!(fakes.spawn_count(), 3);
}

#[test]
fn test_start_while_stopping_waits_for_exit() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    let old_pid = unit.pid().unwrap();

    unit.stop(&mut run_info);
    unit.start(&mut run_info);
    assert_eq!(unit.state(), ProcessState::Stopping);
    assert_eq!(fakes.spawn_count(), 1);
    assert!(run_info.pending.is_empty());

    // the old process goes down from our SIGTERM, then the new one is launched
    unit.on_process_exited(old_pid, ChildTermination::Signal(Signal::SIGTERM), &mut run_info);
    assert_eq!(fakes.spawn_count(), 2);
    assert_eq!(unit.state(), ProcessState::Starting);
    assert_eq!(unit.crash_count(), 0);
    assert!(ack_started(&mut unit, &mut run_info));
    assert_ne!(unit.pid(), Some(old_pid));
}

#[test]
fn test_stop_cancels_pending_start() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    let pid = unit.pid().unwrap();

    unit.stop(&mut run_info);
    unit.start(&mut run_info);
    unit.stop(&mut run_info);
    unit.on_process_exited(pid, ChildTermination::Exit(0), &mut run_info);
    assert_eq!(unit.state(), ProcessState::NotRunning);
    assert_eq!(fakes.spawn_count(), 1);
    assert_eq!(fakes.launcher.borrow().terminated, vec![pid]);
}

#[test]
fn test_exit_of_other_pid_is_ignored() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    let old_pid = unit.pid().unwrap();
    unit.stop(&mut run_info);
    unit.on_process_exited(old_pid, ChildTermination::Signal(Signal::SIGTERM), &mut run_info);
    unit.start(&mut run_info);
    assert!(ack_started(&mut unit, &mut run_info));
    let pid = unit.pid().unwrap();

    // a duplicate report for the old process and one for a stranger
    unit.on_process_exited(old_pid, ChildTermination::Signal(Signal::SIGKILL), &mut run_info);
    unit.on_process_exited(
        nix::unistd::Pid::from_raw(1),
        ChildTermination::Signal(Signal::SIGSEGV),
        &mut run_info,
    );
    assert_eq!(unit.state(), ProcessState::Running);
    assert_eq!(unit.pid(), Some(pid));
    assert_eq!(unit.crash_count(), 0);
    assert_eq!(fakes.spawn_count(), 2);
    assert!(run_info.pending.is_empty());
}

#[test]
fn test_unpublished_unit_does_not_touch_foreign_object() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut first = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    let mut second = UnitSupervisor::new(
        UnitKind::Service,
        UnitSource::FileDescriptor {
            path: PathBuf::from("/usr/share/lemuri/services/applet.desktop"),
            descriptor: UnitDescriptor {
                exec: "/usr/bin/other-applet".to_owned(),
                unit_type: Some(UnitType::Service),
                ..UnitDescriptor::default()
            },
        },
        false,
        &mut run_info,
    );
    assert!(first.is_published());
    assert!(!second.is_published());
    assert_eq!(first.object_path(), second.object_path());

    second.start(&mut run_info);
    assert!(ack_started(&mut second, &mut run_info));
    assert!(fakes.bus.borrow().states_of(first.object_path()).is_empty());

    first.start(&mut run_info);
    assert_eq!(
        fakes.bus.borrow().states_of(first.object_path()),
        vec![ProcessState::Starting]
    );
}

#[test]
fn test_field_codes_are_dropped_from_descriptors() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(
        service_unit("/usr/bin/viewer %U --title=%c -x", &[], &[]),
        false,
        &mut run_info,
    );
    unit.start(&mut run_info);
    assert_eq!(fakes.launcher.borrow().spawned[0].args, vec!["--title=", "-x"]);

    let mut wm = UnitSupervisor::new(
        UnitKind::Custom,
        UnitSource::AdHocCommand("wm --format %U".into()),
        false,
        &mut run_info,
    );
    wm.start(&mut run_info);
    assert_eq!(fakes.launcher.borrow().spawned[1].args, vec!["--format", "%U"]);
}

#[test]
fn test_bus_activated_unit_has_no_process() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut source = service_unit("/usr/bin/indexer", &[], &[]);
    if let UnitSource::FileDescriptor { descriptor, .. } = &mut source {
        descriptor.dbus_exec = "org.lemuri.Indexer".to_owned();
    }
    let mut unit = supervisor(source, false, &mut run_info);

    unit.start(&mut run_info);
    unit.stop(&mut run_info);
    assert_eq!(unit.state(), ProcessState::NotRunning);
    assert_eq!(fakes.spawn_count(), 0);
    assert!(fakes.launcher.borrow().terminated.is_empty());
    assert!(run_info.pending.is_empty());
}

#[test]
fn test_lost_dependency_stops_unit_when_configured() {
    let fakes = Fakes::new();
    fakes.own(BusScope::Session, SESSION_DEP);
    let mut run_info = fakes.runtime_info();

    let mut tolerant = supervisor(
        service_unit("/usr/bin/applet", &[SESSION_DEP], &[]),
        false,
        &mut run_info,
    );
    tolerant.start(&mut run_info);
    assert!(ack_started(&mut tolerant, &mut run_info));
    tolerant.on_dependency_changed(BusScope::Session, SESSION_DEP, false, &mut run_info);
    assert_eq!(tolerant.state(), ProcessState::Running);
    assert!(!tolerant.dependencies_satisfied());
    assert!(fakes.launcher.borrow().terminated.is_empty());

    let mut strict = supervisor(
        service_unit("/usr/bin/applet", &[SESSION_DEP], &[]),
        true,
        &mut run_info,
    );
    strict.start(&mut run_info);
    assert!(ack_started(&mut strict, &mut run_info));
    let pid = strict.pid().unwrap();
    strict.on_dependency_changed(BusScope::Session, SESSION_DEP, false, &mut run_info);
    assert_eq!(strict.state(), ProcessState::Stopping);
    assert_eq!(fakes.launcher.borrow().terminated, vec![pid]);
}

#[test]
fn test_spawn_failure_counts_as_crash() {
    let fakes = Fakes::new();
    fakes.launcher.borrow_mut().fail_spawn = true;
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/missing", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);
    assert_eq!(unit.state(), ProcessState::NotRunning);

    while let Some(event) = run_info.pending.pop_front() {
        assert!(matches!(event, Event::SpawnFailed { .. }));
        unit.on_spawn_failed(&mut run_info);
    }
    assert_eq!(fakes.spawn_count(), 1 + MAX_CRASH_RESPAWNS as usize);
    assert_eq!(unit.state(), ProcessState::NotRunning);
}

#[test]
fn test_empty_exec_never_reaches_the_launcher() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);

    let mut failures = 0;
    while let Some(event) = run_info.pending.pop_front() {
        assert!(matches!(event, Event::SpawnFailed { .. }));
        failures += 1;
        unit.on_spawn_failed(&mut run_info);
    }
    assert_eq!(failures, 1 + MAX_CRASH_RESPAWNS);
    assert_eq!(fakes.spawn_count(), 0);
}

#[test]
fn test_stale_start_notification() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let mut unit = supervisor(service_unit("/usr/bin/applet", &[], &[]), false, &mut run_info);
    unit.start(&mut run_info);
    let pid = unit.pid().unwrap();

    assert!(!unit.on_process_started(nix::unistd::Pid::from_raw(1), &mut run_info));
    assert!(unit.on_process_started(pid, &mut run_info));
    assert!(!unit.on_process_started(pid, &mut run_info));
}

#[test]
fn test_dependency_watcher() {
    let mut watcher = DependencyWatcher::new(BusScope::System);
    assert!(watcher.is_satisfied());

    watcher.add_watched_service("org.a", false);
    watcher.add_watched_service("org.b", true);
    watcher.add_watched_service("org.b", false);
    assert_eq!(watcher.required_count(), 2);
    assert_eq!(watcher.live_count(), 1);
    assert_eq!(watcher.missing(), vec!["org.a"]);
    assert!(!watcher.is_satisfied());

    assert_eq!(watcher.owner_changed("org.c", true), DependencyChange::Unchanged);
    assert_eq!(watcher.owner_changed("org.a", true), DependencyChange::Gained);
    assert_eq!(watcher.owner_changed("org.a", true), DependencyChange::Unchanged);
    assert!(watcher.is_satisfied());

    assert_eq!(watcher.owner_changed("org.b", false), DependencyChange::Lost);
    assert_eq!(watcher.missing(), vec!["org.b"]);
    assert!(!watcher.is_satisfied());
}

#[test]
fn test_registry_scans_only_once() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let dir = tempfile::tempdir().unwrap();
    super::write_descriptor(dir.path(), "b.desktop", &["Type=Service", "Exec=/usr/bin/b"]);
    super::write_descriptor(dir.path(), "a.desktop", &["Type=Service", "Exec=/usr/bin/a"]);
    super::write_descriptor(dir.path(), "link.desktop", &["Type=Link", "Exec=/usr/bin/c"]);
    std::fs::write(dir.path().join("broken.desktop"), "no group here\n[Desktop Entry]\nbroken\n")
        .unwrap();
    std::fs::create_dir(dir.path().join("subdir.desktop")).unwrap();

    let mut registry = UnitRegistry::new(UnitKind::Service);
    assert_eq!(registry.create_units(dir.path(), "lemuri", false, &mut run_info), 2);
    assert_eq!(registry.create_units(dir.path(), "lemuri", false, &mut run_info), 0);
    assert_eq!(registry.len(), 2);
    assert_eq!(fakes.launcher.borrow().spawned_cmds(), vec!["/usr/bin/a", "/usr/bin/b"]);
    assert_eq!(registry.count_in_state(ProcessState::Starting), 2);
    assert!(registry.contains_path(&dir.path().join("a.desktop")));

    let missing = UnitRegistry::new(UnitKind::Service).create_units(
        &dir.path().join("nope"),
        "lemuri",
        false,
        &mut run_info,
    );
    assert_eq!(missing, 0);
}

#[test]
fn test_registry_readiness() {
    let fakes = Fakes::new();
    let mut run_info = fakes.runtime_info();
    let dir = tempfile::tempdir().unwrap();
    super::write_descriptor(dir.path(), "a.desktop", &["Type=Shell", "Exec=/usr/bin/a"]);
    super::write_descriptor(dir.path(), "b.desktop", &["Type=Shell", "Exec=/usr/bin/b"]);

    let mut registry = UnitRegistry::new(UnitKind::Session);
    registry.create_units(dir.path(), "lemuri", false, &mut run_info);
    let ids: Vec<_> = registry.iter().map(|u| u.id().clone()).collect();

    assert!(!registry.mark_ready(&ids[0]));
    assert!(!registry.mark_ready(&ids[0]));
    assert!(registry.mark_ready(&ids[1]));
    assert!(registry.all_ready());
}
