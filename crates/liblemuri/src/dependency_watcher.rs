//! Track which of a unit's required bus services are currently owned.
//!
//! Every supervisor owns one watcher per bus scope. The bus transport reports
//! `NameOwnerChanged` notifications, the watcher turns them into
//! [`DependencyChange`]s and the supervisor decides what to do with them.

use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusScope {
    Session,
    System,
}

impl std::fmt::Display for BusScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::System => f.write_str("system"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyChange {
    Gained,
    Lost,
    Unchanged,
}

#[derive(Debug)]
pub struct DependencyWatcher {
    scope: BusScope,
    required: HashSet<String>,
    live: HashSet<String>,
}

impl DependencyWatcher {
    #[must_use]
    pub fn new(scope: BusScope) -> Self {
        Self {
            scope,
            required: HashSet::new(),
            live: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn scope(&self) -> BusScope {
        self.scope
    }

    /// Registering the same service twice has no effect. `currently_owned` is
    /// the owner state the transport saw when the watch was installed.
    pub fn add_watched_service(&mut self, service: &str, currently_owned: bool) {
        if !self.required.insert(service.to_owned()) {
            return;
        }
        if currently_owned {
            self.live.insert(service.to_owned());
        }
    }

    #[must_use]
    pub fn watches(&self, service: &str) -> bool {
        self.required.contains(service)
    }

    pub fn owner_changed(&mut self, service: &str, new_owner_present: bool) -> DependencyChange {
        if !self.watches(service) {
            return DependencyChange::Unchanged;
        }
        if !new_owner_present {
            self.live.remove(service);
            DependencyChange::Lost
        } else if self.live.insert(service.to_owned()) {
            DependencyChange::Gained
        } else {
            DependencyChange::Unchanged
        }
    }

    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.live.len() == self.required.len()
    }

    #[must_use]
    pub fn required_count(&self) -> usize {
        self.required.len()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Required services that are not owned right now, sorted for logging.
    #[must_use]
    pub fn missing(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = self
            .required
            .difference(&self.live)
            .map(String::as_str)
            .collect();
        missing.sort_unstable();
        missing
    }
}
