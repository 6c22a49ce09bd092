//! Session bus glue.
//!
//! The core only needs the [`SessionBus`] capability: publish the session and
//! its units, push `State` changes, and watch bus names. [`DBusSession`] is
//! the zbus implementation. Method calls on published objects and name owner
//! changes are sent to the event loop as [`Event`]s.

pub mod launch;

use log::{debug, error, info, trace, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use zbus::blocking::{Connection, fdo::DBusProxy};
use zbus::names::BusName;

use crate::dependency_watcher::BusScope;
use crate::events::{Event, EventSender};
use crate::lock_ext::MutexExt;
use crate::units::{ProcessState, UnitAction, UnitId};

pub const SESSION_SERVICE: &str = "org.lemuri.session";
pub const SESSION_OBJECT_PATH: &str = "/org/lemuri/session";

#[derive(Debug)]
pub enum BusError {
    Connection(String),
    Registration(String),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "Bus connection error: {msg}"),
            Self::Registration(msg) => write!(f, "Bus registration error: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}

impl From<zbus::Error> for BusError {
    fn from(e: zbus::Error) -> Self {
        Self::Registration(e.to_string())
    }
}

pub trait SessionBus {
    /// Publish the object that represents the session itself. Failing here
    /// ends the session.
    fn publish_session(&mut self, session_name: &str) -> Result<(), BusError>;

    fn publish_unit(&mut self, unit: &UnitId, object_path: &str, name: &str)
    -> Result<(), BusError>;

    fn unit_state_changed(&mut self, object_path: &str, state: ProcessState);

    /// Start watching the owner of `service`. Returns whether it is owned
    /// right now; later changes arrive as `Event::NameOwnerChanged`.
    fn watch_service(&mut self, scope: BusScope, service: &str) -> bool;
}

struct SessionObject {
    name: String,
}

#[zbus::interface(name = "org.lemuri.session")]
impl SessionObject {
    #[zbus(property)]
    fn name(&self) -> String {
        self.name.clone()
    }
}

struct UnitObject {
    unit: UnitId,
    name: String,
    state: ProcessState,
    events: EventSender,
}

impl UnitObject {
    fn request(&self, action: UnitAction) -> zbus::fdo::Result<()> {
        self.events
            .send(Event::Control {
                unit: self.unit.clone(),
                action,
            })
            .map_err(|e| zbus::fdo::Error::Failed(format!("Session is shutting down: {e}")))
    }
}

#[zbus::interface(name = "org.lemuri.session.Unit")]
impl UnitObject {
    fn start(&self) -> zbus::fdo::Result<()> {
        self.request(UnitAction::Start)
    }

    fn stop(&self) -> zbus::fdo::Result<()> {
        self.request(UnitAction::Stop)
    }

    #[zbus(property)]
    fn name(&self) -> String {
        self.name.clone()
    }

    #[zbus(property)]
    fn state(&self) -> u32 {
        self.state.as_u32()
    }
}

type WatchedNames = Arc<Mutex<HashSet<String>>>;

struct ScopeWatch {
    connection: Connection,
    watched: WatchedNames,
}

/// zbus backed [`SessionBus`].
pub struct DBusSession {
    session: ScopeWatch,
    /// `None` if there is no system bus; system dependencies then never
    /// become satisfied.
    system: Option<ScopeWatch>,
    events: EventSender,
}

impl DBusSession {
    pub fn connect(events: EventSender) -> Result<Self, BusError> {
        let session_connection =
            Connection::session().map_err(|e| BusError::Connection(format!("session bus: {e}")))?;
        let session = ScopeWatch::start(BusScope::Session, session_connection, events.clone())?;

        let system = match Connection::system() {
            Ok(connection) => Some(ScopeWatch::start(BusScope::System, connection, events.clone())?),
            Err(e) => {
                warn!("No system bus, system dependencies cannot be satisfied: {e}");
                None
            }
        };

        Ok(Self {
            session,
            system,
            events,
        })
    }

    fn scope(&self, scope: BusScope) -> Option<&ScopeWatch> {
        match scope {
            BusScope::Session => Some(&self.session),
            BusScope::System => self.system.as_ref(),
        }
    }
}

impl ScopeWatch {
    /// Spawns the listener thread for `NameOwnerChanged` on this bus.
    fn start(scope: BusScope, connection: Connection, events: EventSender) -> Result<Self, BusError> {
        let watched: WatchedNames = Arc::new(Mutex::new(HashSet::new()));
        let proxy = DBusProxy::new(&connection)?;
        let owner_changes = proxy.receive_name_owner_changed()?;

        let thread_watched = watched.clone();
        std::thread::Builder::new()
            .name(format!("{scope}-bus-watch"))
            .spawn(move || {
                for signal in owner_changes {
                    let args = match signal.args() {
                        Ok(args) => args,
                        Err(e) => {
                            warn!("Malformed NameOwnerChanged on the {scope} bus: {e}");
                            continue;
                        }
                    };
                    let service = args.name().to_string();
                    if !thread_watched.lock_poisoned().contains(&service) {
                        continue;
                    }
                    let new_owner_present = args.new_owner().is_some();
                    trace!("{scope} service {service} owned: {new_owner_present}");
                    let event = Event::NameOwnerChanged {
                        scope,
                        service,
                        new_owner_present,
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                debug!("{scope} bus watch ended");
            })
            .map_err(|e| BusError::Connection(format!("could not spawn watch thread: {e}")))?;

        Ok(Self {
            connection,
            watched,
        })
    }

    fn name_has_owner(&self, service: &str) -> Result<bool, BusError> {
        let name = BusName::try_from(service).map_err(|e| BusError::Registration(e.to_string()))?;
        let proxy = DBusProxy::new(&self.connection)?;
        proxy
            .name_has_owner(name)
            .map_err(|e| BusError::Connection(e.to_string()))
    }
}

impl SessionBus for DBusSession {
    fn publish_session(&mut self, session_name: &str) -> Result<(), BusError> {
        let connection = &self.session.connection;
        let added = connection.object_server().at(
            SESSION_OBJECT_PATH,
            SessionObject {
                name: session_name.to_owned(),
            },
        )?;
        if !added {
            return Err(BusError::Registration(format!(
                "{SESSION_OBJECT_PATH} is already registered"
            )));
        }
        connection.request_name(SESSION_SERVICE)?;
        info!("Registered {SESSION_SERVICE} at {SESSION_OBJECT_PATH}");
        Ok(())
    }

    fn publish_unit(
        &mut self,
        unit: &UnitId,
        object_path: &str,
        name: &str,
    ) -> Result<(), BusError> {
        let object = UnitObject {
            unit: unit.clone(),
            name: name.to_owned(),
            state: ProcessState::NotRunning,
            events: self.events.clone(),
        };
        let added = self.session.connection.object_server().at(object_path, object)?;
        if !added {
            return Err(BusError::Registration(format!(
                "{object_path} is already registered"
            )));
        }
        Ok(())
    }

    fn unit_state_changed(&mut self, object_path: &str, state: ProcessState) {
        let iface = match self
            .session
            .connection
            .object_server()
            .interface::<_, UnitObject>(object_path)
        {
            Ok(iface) => iface,
            Err(e) => {
                trace!("{object_path} is not published: {e}");
                return;
            }
        };
        iface.get_mut().state = state;
        let emitted = zbus::block_on(iface.get().state_changed(iface.signal_emitter()));
        if let Err(e) = emitted {
            error!("Could not notify State change of {object_path}: {e}");
        }
    }

    fn watch_service(&mut self, scope: BusScope, service: &str) -> bool {
        let Some(watch) = self.scope(scope) else {
            return false;
        };
        watch.watched.lock_poisoned().insert(service.to_owned());
        match watch.name_has_owner(service) {
            Ok(owned) => owned,
            Err(e) => {
                warn!("Could not query the owner of {scope} service {service}: {e}");
                false
            }
        }
    }
}
