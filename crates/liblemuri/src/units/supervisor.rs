use log::{debug, error, info, trace, warn};
use nix::unistd::Pid;

use crate::dependency_watcher::{BusScope, DependencyChange, DependencyWatcher};
use crate::events::Event;
use crate::process::Commandline;
use crate::runtime_info::RuntimeInfo;
use crate::signal_handler::ChildTermination;
use crate::units::{ProcessState, UnitId, UnitKind, UnitSource, display_name, object_path};

/// How often a crashing unit is respawned over its whole lifetime.
pub const MAX_CRASH_RESPAWNS: u32 = 5;

/// Keeps the process of one unit alive.
///
/// `start` only launches once every required bus service is owned. Crashes
/// are answered with a respawn until the budget is used up. Readiness is
/// reported by [`UnitSupervisor::on_process_started`] returning `true`, once
/// per launch.
#[derive(Debug)]
pub struct UnitSupervisor {
    id: UnitId,
    source: UnitSource,
    name: String,
    object_path: String,
    session_deps: DependencyWatcher,
    system_deps: DependencyWatcher,
    state: ProcessState,
    pid: Option<Pid>,
    crash_count: u32,
    stop_requested: bool,
    /// `start` was called while the old process was still stopping.
    start_after_stop: bool,
    /// Whether the unit object owns its path on the bus. Only then are
    /// state changes pushed there.
    published: bool,
    shutdown_on_missing_deps: bool,
}

impl UnitSupervisor {
    /// Installs the dependency watches and publishes the unit on the bus.
    /// The unit is not started.
    pub fn new(
        kind: UnitKind,
        source: UnitSource,
        shutdown_on_missing_deps: bool,
        run_info: &mut RuntimeInfo,
    ) -> Self {
        let key = match &source {
            UnitSource::FileDescriptor { path, .. } => path.to_string_lossy().into_owned(),
            UnitSource::AdHocCommand(cmd) => cmd.clone(),
        };
        let id = UnitId::new(kind, key);
        let name = display_name(&source);
        let object_path = object_path(kind, &source);

        let mut session_deps = DependencyWatcher::new(BusScope::Session);
        let mut system_deps = DependencyWatcher::new(BusScope::System);
        if let Some(descriptor) = source.descriptor() {
            for service in &descriptor.session_requires {
                let owned = run_info.bus.watch_service(BusScope::Session, service);
                session_deps.add_watched_service(service, owned);
            }
            for service in &descriptor.system_requires {
                let owned = run_info.bus.watch_service(BusScope::System, service);
                system_deps.add_watched_service(service, owned);
            }
        }

        let published = match run_info.bus.publish_unit(&id, &object_path, &name) {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to register unit object {object_path} on the bus: {e}");
                false
            }
        };

        match source.descriptor() {
            Some(descriptor) => debug!(
                "{object_path}: Exec={:?} DBusExec={:?} OnlyShowIn={:?} DBusSessionRequires={:?} DBusSystemRequires={:?} Enabled={}",
                descriptor.exec,
                descriptor.dbus_exec,
                descriptor.only_show_in,
                descriptor.session_requires,
                descriptor.system_requires,
                descriptor.enabled,
            ),
            None => debug!("{object_path}: Exec={:?}", source.exec()),
        }

        Self {
            id,
            source,
            name,
            object_path,
            session_deps,
            system_deps,
            state: ProcessState::NotRunning,
            pid: None,
            crash_count: 0,
            stop_requested: false,
            start_after_stop: false,
            published,
            shutdown_on_missing_deps,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &UnitId {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> UnitKind {
        self.id.kind
    }

    #[must_use]
    pub const fn source(&self) -> &UnitSource {
        &self.source
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// Bus-activated units have no local process and are always
    /// `NotRunning` from our point of view.
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    #[must_use]
    pub const fn pid(&self) -> Option<Pid> {
        self.pid
    }

    #[must_use]
    pub const fn crash_count(&self) -> u32 {
        self.crash_count
    }

    #[must_use]
    pub const fn is_published(&self) -> bool {
        self.published
    }

    #[must_use]
    pub fn dependencies_satisfied(&self) -> bool {
        self.session_deps.is_satisfied() && self.system_deps.is_satisfied()
    }

    fn set_state(&mut self, state: ProcessState, run_info: &mut RuntimeInfo) {
        if self.state == state {
            return;
        }
        trace!("{}: {} -> {}", self.object_path, self.state, state);
        self.state = state;
        if self.published {
            run_info.bus.unit_state_changed(&self.object_path, state);
        }
    }

    pub fn start(&mut self, run_info: &mut RuntimeInfo) {
        if !self.dependencies_satisfied() {
            debug!(
                "{} not ready, waiting for session services {:?} and system services {:?}",
                self.object_path,
                self.session_deps.missing(),
                self.system_deps.missing(),
            );
            return;
        }

        if !self.source.has_local_process() {
            // TODO: call the DBusExec activation through the session bus
            info!("{} is bus activated, not spawning", self.object_path);
            return;
        }

        match self.state {
            ProcessState::Starting | ProcessState::Running => {
                trace!("{} is already {}", self.object_path, self.state);
                return;
            }
            ProcessState::Stopping => {
                debug!("{} is still stopping, starting it once it exited", self.object_path);
                self.start_after_stop = true;
                return;
            }
            ProcessState::NotRunning => {}
        }

        info!("Starting {}", self.object_path);
        self.stop_requested = false;
        self.set_state(ProcessState::Starting, run_info);

        let spawned = self.commandline().and_then(|cmdline| {
            run_info
                .launcher
                .spawn(&cmdline)
                .map_err(|e| format!("{cmdline}: {e}"))
        });
        match spawned {
            Ok(pid) => {
                self.pid = Some(pid);
                run_info.post(Event::ProcessStarted {
                    unit: self.id.clone(),
                    pid,
                });
            }
            Err(e) => {
                error!("Could not start {}: {e}", self.object_path);
                self.set_state(ProcessState::NotRunning, run_info);
                run_info.post(Event::SpawnFailed {
                    unit: self.id.clone(),
                });
            }
        }
    }

    /// Descriptor `Exec=` lines may carry field codes, there is no file or
    /// URL to put in their place.
    fn commandline(&self) -> Result<Commandline, String> {
        let cmdline = Commandline::parse(self.source.exec())?;
        match self.source {
            UnitSource::FileDescriptor { .. } => Ok(cmdline.without_field_codes()),
            UnitSource::AdHocCommand(_) => Ok(cmdline),
        }
    }

    pub fn stop(&mut self, run_info: &mut RuntimeInfo) {
        if !self.source.has_local_process() {
            info!("{} is bus activated, nothing to stop", self.object_path);
            return;
        }
        if self.state == ProcessState::Stopping {
            self.start_after_stop = false;
            return;
        }
        if self.state != ProcessState::Starting && self.state != ProcessState::Running {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };

        info!("Stopping {}", self.object_path);
        self.stop_requested = true;
        self.start_after_stop = false;
        self.set_state(ProcessState::Stopping, run_info);
        if let Err(e) = run_info.launcher.terminate(pid) {
            warn!("Could not send SIGTERM to {} ({pid}): {e}", self.object_path);
        }
    }

    /// Returns `true` if this was the launch the unit was waiting for, which
    /// makes it ready.
    pub fn on_process_started(&mut self, pid: Pid, run_info: &mut RuntimeInfo) -> bool {
        if self.pid != Some(pid) || self.state != ProcessState::Starting {
            trace!("{}: stale start notification for {pid}", self.object_path);
            return false;
        }
        self.set_state(ProcessState::Running, run_info);
        true
    }

    /// Exits of any pid but the current one are ignored.
    pub fn on_process_exited(
        &mut self,
        pid: Pid,
        termination: ChildTermination,
        run_info: &mut RuntimeInfo,
    ) {
        if self.pid != Some(pid) {
            trace!("{}: ignoring exit of stale process {pid}", self.object_path);
            return;
        }
        info!("{} exited with {termination}", self.object_path);
        self.pid = None;
        self.set_state(ProcessState::NotRunning, run_info);

        if self.stop_requested {
            self.stop_requested = false;
            if std::mem::take(&mut self.start_after_stop) {
                self.start(run_info);
            }
            return;
        }
        if termination.crashed() {
            self.respawn_after_crash(run_info);
        }
    }

    /// A command that cannot even be spawned is counted like a crash, so a
    /// broken `Exec=` cannot respawn forever.
    pub fn on_spawn_failed(&mut self, run_info: &mut RuntimeInfo) {
        self.pid = None;
        self.set_state(ProcessState::NotRunning, run_info);
        self.respawn_after_crash(run_info);
    }

    fn respawn_after_crash(&mut self, run_info: &mut RuntimeInfo) {
        if self.crash_count < MAX_CRASH_RESPAWNS {
            self.crash_count += 1;
            warn!(
                "{} has crashed, respawning ({}/{})",
                self.object_path, self.crash_count, MAX_CRASH_RESPAWNS
            );
            self.start(run_info);
        } else {
            error!(
                "{} failed again after {} respawns, giving up on it",
                self.object_path, self.crash_count
            );
        }
    }

    /// A system service showing up retries the start, a session service does
    /// not.
    pub fn on_dependency_changed(
        &mut self,
        scope: BusScope,
        service: &str,
        new_owner_present: bool,
        run_info: &mut RuntimeInfo,
    ) {
        let watcher = match scope {
            BusScope::Session => &mut self.session_deps,
            BusScope::System => &mut self.system_deps,
        };
        match watcher.owner_changed(service, new_owner_present) {
            DependencyChange::Gained => {
                debug!("{}: {scope} service {service} appeared", self.object_path);
                if scope == BusScope::System {
                    self.start(run_info);
                }
            }
            DependencyChange::Lost => {
                debug!("{}: {scope} service {service} vanished", self.object_path);
                if self.shutdown_on_missing_deps {
                    self.stop(run_info);
                }
            }
            DependencyChange::Unchanged => {}
        }
    }
}
