//! Everything that can happen to the session is an `Event`. Events are
//! produced by the signal thread, the bus threads and by handlers themselves,
//! and consumed one at a time by the event loop.

use crate::dependency_watcher::BusScope;
use crate::signal_handler::ChildTermination;
use crate::units::{UnitAction, UnitId};
use nix::unistd::Pid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    NameOwnerChanged {
        scope: BusScope,
        service: String,
        new_owner_present: bool,
    },
    /// The process of `unit` was spawned successfully.
    ProcessStarted { unit: UnitId, pid: Pid },
    /// The process of `unit` could not be spawned at all.
    SpawnFailed { unit: UnitId },
    ChildExited {
        pid: Pid,
        termination: ChildTermination,
    },
    /// `Start`/`Stop` called on a published unit object.
    Control { unit: UnitId, action: UnitAction },
    /// The armed phase timer expired.
    PhaseTimeout,
    Shutdown,
}

pub type EventSender = std::sync::mpsc::Sender<Event>;
pub type EventReceiver = std::sync::mpsc::Receiver<Event>;
