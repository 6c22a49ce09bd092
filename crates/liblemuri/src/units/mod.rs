//! Everything that has to do with units: the descriptor files, the supervisor
//! that keeps a unit's process alive and the per-phase registries.

mod descriptor;
mod registry;
mod supervisor;
mod unit_name;
mod unit_parser;

pub use descriptor::*;
pub use registry::*;
pub use supervisor::*;
pub use unit_name::*;
pub use unit_parser::*;

/// Which phase a unit belongs to. Also decides the object path namespace the
/// unit is published under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitKind {
    /// Shell units, started after the window manager.
    Session,
    Service,
    Autostart,
    /// Ad hoc units that are not backed by a file, e.g. the window manager.
    Custom,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Session => "session",
            Self::Service => "service",
            Self::Autostart => "autostart",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Identity of a supervised unit. For file-backed units the key is the
/// descriptor path, for ad hoc units it is the command line.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    pub kind: UnitKind,
    pub key: String,
}

impl UnitId {
    pub fn new(kind: UnitKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Lifecycle of the process behind a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ProcessState {
    #[default]
    NotRunning,
    Starting,
    Running,
    Stopping,
}

impl ProcessState {
    /// Value of the published `State` property.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::NotRunning => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotRunning => "not running",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Operations that can be requested on a unit over the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitAction {
    Start,
    Stop,
}
