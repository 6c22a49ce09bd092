mod supervisor;

use crate::dbus::{BusError, SessionBus};
use crate::dependency_watcher::BusScope;
use crate::process::{Commandline, ProcessLauncher};
use crate::runtime_info::RuntimeInfo;
use crate::units::{ProcessState, UnitId};
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Default)]
pub struct LaunchLog {
    pub spawned: Vec<Commandline>,
    pub terminated: Vec<Pid>,
    pub fail_spawn: bool,
    next_pid: i32,
}

impl LaunchLog {
    pub fn spawned_cmds(&self) -> Vec<&str> {
        self.spawned.iter().map(|c| c.cmd.as_str()).collect()
    }
}

pub struct FakeLauncher(Rc<RefCell<LaunchLog>>);

impl ProcessLauncher for FakeLauncher {
    fn spawn(&mut self, cmdline: &Commandline) -> std::io::Result<Pid> {
        let mut log = self.0.borrow_mut();
        log.spawned.push(cmdline.clone());
        if log.fail_spawn {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file",
            ));
        }
        log.next_pid += 1;
        Ok(Pid::from_raw(1000 + log.next_pid))
    }

    fn terminate(&mut self, pid: Pid) -> Result<(), nix::Error> {
        self.0.borrow_mut().terminated.push(pid);
        Ok(())
    }
}

#[derive(Default)]
pub struct BusLog {
    pub session: Option<String>,
    pub fail_session: bool,
    pub units: Vec<(UnitId, String, String)>,
    pub state_changes: Vec<(String, ProcessState)>,
    pub owned: HashSet<(BusScope, String)>,
    pub watches: Vec<(BusScope, String)>,
}

impl BusLog {
    pub fn states_of(&self, object_path: &str) -> Vec<ProcessState> {
        self.state_changes
            .iter()
            .filter(|(path, _)| path == object_path)
            .map(|(_, state)| *state)
            .collect()
    }
}

pub struct FakeBus(Rc<RefCell<BusLog>>);

impl SessionBus for FakeBus {
    fn publish_session(&mut self, session_name: &str) -> Result<(), BusError> {
        let mut log = self.0.borrow_mut();
        if log.fail_session {
            return Err(BusError::Registration("name already taken".into()));
        }
        log.session = Some(session_name.to_owned());
        Ok(())
    }

    fn publish_unit(
        &mut self,
        unit: &UnitId,
        object_path: &str,
        name: &str,
    ) -> Result<(), BusError> {
        let mut log = self.0.borrow_mut();
        if log.units.iter().any(|(_, path, _)| path == object_path) {
            return Err(BusError::Registration(format!(
                "{object_path} is already registered"
            )));
        }
        log.units
            .push((unit.clone(), object_path.to_owned(), name.to_owned()));
        Ok(())
    }

    fn unit_state_changed(&mut self, object_path: &str, state: ProcessState) {
        self.0
            .borrow_mut()
            .state_changes
            .push((object_path.to_owned(), state));
    }

    fn watch_service(&mut self, scope: BusScope, service: &str) -> bool {
        let mut log = self.0.borrow_mut();
        log.watches.push((scope, service.to_owned()));
        log.owned.contains(&(scope, service.to_owned()))
    }
}

pub struct Fakes {
    pub launcher: Rc<RefCell<LaunchLog>>,
    pub bus: Rc<RefCell<BusLog>>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            launcher: Rc::new(RefCell::new(LaunchLog::default())),
            bus: Rc::new(RefCell::new(BusLog::default())),
        }
    }

    pub fn own(&self, scope: BusScope, service: &str) {
        self.bus
            .borrow_mut()
            .owned
            .insert((scope, service.to_owned()));
    }

    pub fn runtime_info(&self) -> RuntimeInfo {
        RuntimeInfo::new(
            Box::new(FakeLauncher(self.launcher.clone())),
            Box::new(FakeBus(self.bus.clone())),
        )
    }

    pub fn spawn_count(&self) -> usize {
        self.launcher.borrow().spawned.len()
    }
}

/// Writes a `[Desktop Entry]` descriptor made of `lines` into `dir`.
pub fn write_descriptor(dir: &std::path::Path, file_name: &str, lines: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut content = String::from("[Desktop Entry]\n");
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    std::fs::write(dir.join(file_name), content).unwrap();
}
