//! The `RuntimeInfo` bundles what supervisors need from the outside world:
//! a way to launch processes, the session bus and the queue for follow-up
//! events.
//!
//! There is only one `RuntimeInfo`, owned by the phase state machine and lent
//! to a supervisor while one of its handlers runs. Everything runs on the
//! event loop thread, so nothing in here is locked.

use crate::dbus::SessionBus;
use crate::events::Event;
use crate::process::ProcessLauncher;
use std::collections::VecDeque;

pub struct RuntimeInfo {
    pub launcher: Box<dyn ProcessLauncher>,
    pub bus: Box<dyn SessionBus>,
    /// Events raised by handlers. Drained before the next external event is
    /// read.
    pub pending: VecDeque<Event>,
}

impl RuntimeInfo {
    pub fn new(launcher: Box<dyn ProcessLauncher>, bus: Box<dyn SessionBus>) -> Self {
        Self {
            launcher,
            bus,
            pending: VecDeque::new(),
        }
    }

    pub fn post(&mut self, event: Event) {
        self.pending.push_back(event);
    }
}
