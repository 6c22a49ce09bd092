use std::collections::BTreeSet;
use std::path::PathBuf;

/// The `Type=` of a descriptor file. Anything else makes the descriptor
/// ineligible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitType {
    Application,
    Service,
    Shell,
}

impl UnitType {
    #[must_use]
    pub fn from_setting(value: &str) -> Option<Self> {
        match value {
            "Application" => Some(Self::Application),
            "Service" => Some(Self::Service),
            "Shell" => Some(Self::Shell),
            _ => None,
        }
    }
}

/// A parsed descriptor file. Never changes after it was loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub exec: String,
    /// If set, somebody else starts the unit with a bus call and no local
    /// process is created.
    pub dbus_exec: String,
    pub session_requires: BTreeSet<String>,
    pub system_requires: BTreeSet<String>,
    pub only_show_in: BTreeSet<String>,
    /// Parsed and shown, but not consulted before launching.
    pub enabled: bool,
    pub unit_type: Option<UnitType>,
}

impl UnitDescriptor {
    #[must_use]
    pub fn is_bus_activated(&self) -> bool {
        !self.dbus_exec.is_empty()
    }

    #[must_use]
    pub fn is_visible_in(&self, session_name: &str) -> bool {
        if self.only_show_in.is_empty() {
            return true;
        }
        let session_name = session_name.to_lowercase();
        self.only_show_in
            .iter()
            .any(|name| name.to_lowercase() == session_name)
    }

    /// A unit is launched only if its type is known and the visibility
    /// filter allows the running session.
    #[must_use]
    pub fn is_eligible(&self, session_name: &str) -> bool {
        self.unit_type.is_some() && self.is_visible_in(session_name)
    }
}

/// Where a supervisor got its command from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitSource {
    FileDescriptor {
        path: PathBuf,
        descriptor: UnitDescriptor,
    },
    AdHocCommand(String),
}

impl UnitSource {
    #[must_use]
    pub fn exec(&self) -> &str {
        match self {
            Self::FileDescriptor { descriptor, .. } => &descriptor.exec,
            Self::AdHocCommand(cmd) => cmd,
        }
    }

    #[must_use]
    pub fn has_local_process(&self) -> bool {
        match self {
            Self::FileDescriptor { descriptor, .. } => !descriptor.is_bus_activated(),
            Self::AdHocCommand(_) => true,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<&UnitDescriptor> {
        match self {
            Self::FileDescriptor { descriptor, .. } => Some(descriptor),
            Self::AdHocCommand(_) => None,
        }
    }
}
