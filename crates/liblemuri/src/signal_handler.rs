//! Handle signals sent to this process from either the outside or the child
//! processes. Nothing is handled here directly: exited children and
//! termination requests are turned into events for the event loop.

use crate::events::{Event, EventSender};
use log::{error, info, trace};
use signal_hook::iterator::Signals;

pub fn handle_signals(mut signals: Signals, events: EventSender) {
    for signal in signals.forever() {
        match signal as libc::c_int {
            signal_hook::consts::SIGCHLD => {
                for val in std::iter::from_fn(get_next_exited_child).take_while(Result::is_ok) {
                    match val {
                        Ok((pid, termination)) => {
                            trace!("Child {pid} exited with {termination}");
                            if events
                                .send(Event::ChildExited { pid, termination })
                                .is_err()
                            {
                                // event loop is gone, nobody cares anymore
                                return;
                            }
                        }
                        Err(e) => error!("{e}"),
                    }
                }
            }
            signal_hook::consts::SIGTERM
            | signal_hook::consts::SIGINT
            | signal_hook::consts::SIGQUIT => {
                info!("Received termination signal. Ending session");
                if events.send(Event::Shutdown).is_err() {
                    return;
                }
            }
            _ => unreachable!(),
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ChildTermination {
    Signal(nix::sys::signal::Signal),
    Exit(i32),
}

impl std::fmt::Display for ChildTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Signal(sig) => write!(f, "signal {sig}"),
            Self::Exit(code) => write!(f, "exit code {code}"),
        }
    }
}

impl ChildTermination {
    /// A process killed by a signal crashed. Exiting, even with a non-zero
    /// code, is a normal exit.
    #[must_use]
    pub const fn crashed(&self) -> bool {
        matches!(self, Self::Signal(_))
    }
}

type ChildIterElem = Result<(nix::unistd::Pid, ChildTermination), nix::Error>;

fn get_next_exited_child() -> Option<ChildIterElem> {
    let wait_any_pid = nix::unistd::Pid::from_raw(-1);
    let wait_flags = nix::sys::wait::WaitPidFlag::WNOHANG;
    match nix::sys::wait::waitpid(wait_any_pid, Some(wait_flags)) {
        Ok(exit_status) => match exit_status {
            nix::sys::wait::WaitStatus::Exited(pid, code) => {
                Some(Ok((pid, ChildTermination::Exit(code))))
            }
            nix::sys::wait::WaitStatus::Signaled(pid, signal, _dumped_core) => {
                Some(Ok((pid, ChildTermination::Signal(signal))))
            }
            nix::sys::wait::WaitStatus::StillAlive => {
                trace!("No more state changes to poll");
                None
            }
            _ => {
                trace!("Ignored child signal received with code: {exit_status:?}");
                // stop/continue of children is not interesting
                get_next_exited_child()
            }
        },
        Err(e) => {
            if e != nix::Error::ECHILD {
                trace!("Error while waiting: {e}");
            }
            Some(Err(e))
        }
    }
}
