//! The phase state machine drives the session through its startup stages:
//!
//! ```text
//! Init -> WindowManagerPending -> ShellPending -> ServicesPending -> AutostartLoading -> Idle
//! ```
//!
//! The shell and services phases wait for their units to report `started`,
//! but never longer than a timer of 200ms per unit. When the timer fires and
//! units are still starting, it is re-armed for 200ms per starting unit;
//! once nothing is starting anymore the phase gives up and advances. A unit
//! that never becomes ready can delay the session, but not hang it.

use log::{debug, info, trace, warn};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::dbus::BusError;
use crate::events::Event;
use crate::runtime_info::RuntimeInfo;
use crate::units::{
    ProcessState, UnitAction, UnitId, UnitKind, UnitRegistry, UnitSource, UnitSupervisor,
};

/// Time a single unit gets to report `started`.
pub const UNIT_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    WindowManagerPending,
    ShellPending,
    ServicesPending,
    AutostartLoading,
    Idle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletedPhases(u8);

impl CompletedPhases {
    pub const WINDOW_MANAGER_STARTED: Self = Self(0x01);
    pub const SHELL_STARTED: Self = Self(0x02);
    pub const SERVICES_STARTED: Self = Self(0x04);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// The two phases that wait for their units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatedPhase {
    Shell,
    Services,
}

impl GatedPhase {
    const fn completion(self) -> CompletedPhases {
        match self {
            Self::Shell => CompletedPhases::SHELL_STARTED,
            Self::Services => CompletedPhases::SERVICES_STARTED,
        }
    }

    const fn pending(self) -> Phase {
        match self {
            Self::Shell => Phase::ShellPending,
            Self::Services => Phase::ServicesPending,
        }
    }
}

impl std::fmt::Display for GatedPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell => f.write_str("shell"),
            Self::Services => f.write_str("services"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PhaseTimer {
    phase: GatedPhase,
    deadline: Instant,
    duration: Duration,
}

/// Every supervisor of the session, grouped by phase.
#[derive(Debug)]
pub struct SessionUnits {
    pub window_manager: Option<UnitSupervisor>,
    pub shell: UnitRegistry,
    pub services: UnitRegistry,
    pub autostart: UnitRegistry,
}

impl SessionUnits {
    fn new() -> Self {
        Self {
            window_manager: None,
            shell: UnitRegistry::new(UnitKind::Session),
            services: UnitRegistry::new(UnitKind::Service),
            autostart: UnitRegistry::new(UnitKind::Autostart),
        }
    }

    fn registry_mut(&mut self, phase: GatedPhase) -> &mut UnitRegistry {
        match phase {
            GatedPhase::Shell => &mut self.shell,
            GatedPhase::Services => &mut self.services,
        }
    }

    #[must_use]
    pub fn get(&self, id: &UnitId) -> Option<&UnitSupervisor> {
        match id.kind {
            UnitKind::Session => self.shell.get(id),
            UnitKind::Service => self.services.get(id),
            UnitKind::Autostart => self.autostart.get(id),
            UnitKind::Custom => self.window_manager.as_ref().filter(|wm| wm.id() == id),
        }
    }

    pub fn get_mut(&mut self, id: &UnitId) -> Option<&mut UnitSupervisor> {
        match id.kind {
            UnitKind::Session => self.shell.get_mut(id),
            UnitKind::Service => self.services.get_mut(id),
            UnitKind::Autostart => self.autostart.get_mut(id),
            UnitKind::Custom => self.window_manager.as_mut().filter(|wm| wm.id() == id),
        }
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut UnitSupervisor)) {
        if let Some(wm) = self.window_manager.as_mut() {
            f(wm);
        }
        self.shell.iter_mut().for_each(&mut f);
        self.services.iter_mut().for_each(&mut f);
        self.autostart.iter_mut().for_each(&mut f);
    }
}

pub struct PhaseStateMachine {
    config: Config,
    phase: Phase,
    completed: CompletedPhases,
    units: SessionUnits,
    timer: Option<PhaseTimer>,
    pid_table: HashMap<Pid, UnitId>,
    run_info: RuntimeInfo,
}

impl PhaseStateMachine {
    pub fn new(config: Config, run_info: RuntimeInfo) -> Self {
        Self {
            config,
            phase: Phase::Init,
            completed: CompletedPhases::default(),
            units: SessionUnits::new(),
            timer: None,
            pid_table: HashMap::new(),
            run_info,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn completed(&self) -> CompletedPhases {
        self.completed
    }

    #[must_use]
    pub const fn units(&self) -> &SessionUnits {
        &self.units
    }

    /// When the armed phase timer expires, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|timer| timer.deadline)
    }

    /// The phase and duration the timer was last armed with.
    #[must_use]
    pub fn armed_timer(&self) -> Option<(GatedPhase, Duration)> {
        self.timer.map(|timer| (timer.phase, timer.duration))
    }

    /// Publishes the session object and kicks off the first phase. Nothing
    /// is launched if the session cannot be published.
    pub fn start(&mut self) -> Result<(), BusError> {
        self.run_info
            .bus
            .publish_session(&self.config.session_name)?;
        info!("Session {} registered", self.config.session_name);

        match self.config.window_manager.clone() {
            None => {
                info!("No window manager configured");
                self.load_phase(GatedPhase::Shell);
            }
            Some(command) => {
                self.phase = Phase::WindowManagerPending;
                info!("Starting window manager {command}");
                let mut wm = UnitSupervisor::new(
                    UnitKind::Custom,
                    UnitSource::AdHocCommand(command),
                    self.config.shutdown_on_missing_deps,
                    &mut self.run_info,
                );
                wm.start(&mut self.run_info);
                self.units.window_manager = Some(wm);
            }
        }
        Ok(())
    }

    /// Handles one event and everything that follows from it.
    pub fn handle_event(&mut self, event: Event) {
        self.dispatch(event);
        self.process_pending();
    }

    /// Handles the events raised by earlier handlers until none are left.
    pub fn process_pending(&mut self) {
        while let Some(event) = self.run_info.pending.pop_front() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: Event) {
        trace!("Handling {event:?}");
        match event {
            Event::NameOwnerChanged {
                scope,
                service,
                new_owner_present,
            } => {
                let run_info = &mut self.run_info;
                self.units.for_each_mut(|unit| {
                    unit.on_dependency_changed(scope, &service, new_owner_present, run_info);
                });
            }
            Event::ProcessStarted { unit, pid } => {
                self.pid_table.insert(pid, unit.clone());
                let ready = match self.units.get_mut(&unit) {
                    Some(supervisor) => supervisor.on_process_started(pid, &mut self.run_info),
                    None => false,
                };
                if ready {
                    self.unit_started(&unit);
                }
            }
            Event::SpawnFailed { unit } => {
                if let Some(supervisor) = self.units.get_mut(&unit) {
                    supervisor.on_spawn_failed(&mut self.run_info);
                }
            }
            Event::ChildExited { pid, termination } => match self.pid_table.remove(&pid) {
                Some(unit) => {
                    if let Some(supervisor) = self.units.get_mut(&unit) {
                        supervisor.on_process_exited(pid, termination, &mut self.run_info);
                    }
                }
                None => trace!("Child {pid} does not belong to a unit. Probably a reparented orphan"),
            },
            Event::Control { unit, action } => match self.units.get_mut(&unit) {
                Some(supervisor) => match action {
                    UnitAction::Start => supervisor.start(&mut self.run_info),
                    UnitAction::Stop => supervisor.stop(&mut self.run_info),
                },
                None => warn!("Control request for unknown unit {unit}"),
            },
            Event::PhaseTimeout => self.phase_timeout(),
            Event::Shutdown => self.shutdown(),
        }
    }

    fn unit_started(&mut self, unit: &UnitId) {
        match unit.kind {
            UnitKind::Custom => self.window_manager_started(),
            UnitKind::Session => self.gated_unit_started(GatedPhase::Shell, unit),
            UnitKind::Service => self.gated_unit_started(GatedPhase::Services, unit),
            UnitKind::Autostart => trace!("Autostart unit {unit} started"),
        }
    }

    fn window_manager_started(&mut self) {
        if self.completed.contains(CompletedPhases::WINDOW_MANAGER_STARTED) {
            return;
        }
        info!("Window manager started");
        self.completed.insert(CompletedPhases::WINDOW_MANAGER_STARTED);
        self.load_phase(GatedPhase::Shell);
    }

    fn load_phase(&mut self, phase: GatedPhase) {
        self.phase = phase.pending();
        let dir: PathBuf = match phase {
            GatedPhase::Shell => self.config.shell_dir.clone(),
            GatedPhase::Services => self.config.services_dir.clone(),
        };
        info!("Loading {phase} units from {dir:?}");

        let registry = self.units.registry_mut(phase);
        registry.create_units(
            &dir,
            &self.config.session_name,
            self.config.shutdown_on_missing_deps,
            &mut self.run_info,
        );

        let count = registry.len();
        if count == 0 {
            debug!("No {phase} units, moving on");
            self.finish_phase(phase);
        } else {
            self.arm_timer(phase, UNIT_TIMEOUT * count as u32);
        }
    }

    fn gated_unit_started(&mut self, phase: GatedPhase, unit: &UnitId) {
        if self.completed.contains(phase.completion()) {
            return;
        }
        if self.units.registry_mut(phase).mark_ready(unit) {
            info!("All {phase} units started");
            self.finish_phase(phase);
        }
    }

    fn phase_timeout(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        let phase = timer.phase;
        if self.completed.contains(phase.completion()) {
            return;
        }

        let starting = self
            .units
            .registry_mut(phase)
            .count_in_state(ProcessState::Starting);
        if starting > 0 {
            debug!("{starting} {phase} units are still starting, waiting a bit longer");
            self.arm_timer(phase, UNIT_TIMEOUT * starting as u32);
        } else {
            warn!("Timed out waiting for {phase} units, moving on");
            self.finish_phase(phase);
        }
    }

    fn arm_timer(&mut self, phase: GatedPhase, duration: Duration) {
        trace!("Arming {phase} timer for {duration:?}");
        self.timer = Some(PhaseTimer {
            phase,
            deadline: Instant::now() + duration,
            duration,
        });
    }

    fn finish_phase(&mut self, phase: GatedPhase) {
        if self.completed.contains(phase.completion()) {
            return;
        }
        self.completed.insert(phase.completion());
        if self.timer.is_some_and(|timer| timer.phase == phase) {
            self.timer = None;
        }
        match phase {
            GatedPhase::Shell => self.load_phase(GatedPhase::Services),
            GatedPhase::Services => self.load_autostart(),
        }
    }

    fn load_autostart(&mut self) {
        self.phase = Phase::AutostartLoading;
        for dir in self.config.autostart_dirs.clone() {
            info!("Loading autostart units from {dir:?}");
            self.units.autostart.create_units(
                &dir,
                &self.config.session_name,
                self.config.shutdown_on_missing_deps,
                &mut self.run_info,
            );
        }
        self.phase = Phase::Idle;
        info!("Session {} is up", self.config.session_name);
    }

    /// Removes the queued follow-up events so a test can deliver them in its
    /// own order.
    #[cfg(test)]
    pub(crate) fn take_pending(&mut self) -> Vec<Event> {
        self.run_info.pending.drain(..).collect()
    }

    /// Sends SIGTERM to every unit without waiting for them to exit.
    pub fn shutdown(&mut self) {
        info!("Stopping all units");
        self.timer = None;
        let run_info = &mut self.run_info;
        self.units.for_each_mut(|unit| unit.stop(run_info));
    }
}
