use log::{debug, trace, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::runtime_info::RuntimeInfo;
use crate::units::{
    ProcessState, UnitId, UnitKind, UnitSource, UnitSupervisor, load_descriptor,
};

/// The units of one phase, keyed by their identity. Scanning a directory a
/// second time never creates a second supervisor for the same file.
#[derive(Debug)]
pub struct UnitRegistry {
    kind: UnitKind,
    units: BTreeMap<UnitId, UnitSupervisor>,
    ready: HashSet<UnitId>,
}

impl UnitRegistry {
    #[must_use]
    pub fn new(kind: UnitKind) -> Self {
        Self {
            kind,
            units: BTreeMap::new(),
            ready: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> UnitKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.units
            .contains_key(&UnitId::new(self.kind, path.to_string_lossy()))
    }

    #[must_use]
    pub fn get(&self, id: &UnitId) -> Option<&UnitSupervisor> {
        self.units.get(id)
    }

    pub fn get_mut(&mut self, id: &UnitId) -> Option<&mut UnitSupervisor> {
        self.units.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitSupervisor> {
        self.units.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UnitSupervisor> {
        self.units.values_mut()
    }

    #[must_use]
    pub fn count_in_state(&self, state: ProcessState) -> usize {
        self.units.values().filter(|u| u.state() == state).count()
    }

    /// Remember that `id` reported `started`. Returns `true` when every unit
    /// of the registry has done so.
    pub fn mark_ready(&mut self, id: &UnitId) -> bool {
        if self.units.contains_key(id) {
            self.ready.insert(id.clone());
        }
        self.all_ready()
    }

    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.units.keys().all(|id| self.ready.contains(id))
    }

    /// Creates, registers and starts a supervisor for every eligible
    /// descriptor in `dir` that is not known yet. Returns how many units
    /// were added.
    pub fn create_units(
        &mut self,
        dir: &Path,
        session_name: &str,
        shutdown_on_missing_deps: bool,
        run_info: &mut RuntimeInfo,
    ) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Not loading {} units from {dir:?}: {e}", self.kind);
                return 0;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!("Error while reading {dir:?}: {e}");
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut added = 0;
        for path in files {
            trace!("Found {path:?}");
            if self.contains_path(&path) {
                continue;
            }

            let descriptor = match load_descriptor(&path) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("Ignoring unit: {e}");
                    continue;
                }
            };
            if !descriptor.is_eligible(session_name) {
                debug!("Skipping {path:?}, not eligible for session {session_name}");
                continue;
            }

            let mut unit = UnitSupervisor::new(
                self.kind,
                UnitSource::FileDescriptor { path, descriptor },
                shutdown_on_missing_deps,
                run_info,
            );
            unit.start(run_info);
            self.units.insert(unit.id().clone(), unit);
            added += 1;
        }
        added
    }
}
