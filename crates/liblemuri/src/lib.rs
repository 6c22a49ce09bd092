//! `liblemuri` is the core library of lemuri-session, the process that brings
//! up a desktop session in ordered phases.
//!
//! It contains:
//! - Unit descriptor parsing (INI `[Desktop Entry]` files)
//! - The unit supervisor (dependency gating, spawning, crash respawn)
//! - The phase state machine (window manager → shell → services → autostart)
//! - D-Bus glue: the session object, per-unit objects and name watchers
//! - The single-threaded event loop that drives all of the above

pub mod config;
pub mod dbus;
pub mod dependency_watcher;
pub mod entrypoints;
pub mod events;
pub mod lock_ext;
pub mod logging;
pub mod phases;
pub mod process;
pub mod runtime_info;
pub mod signal_handler;
pub mod units;

#[cfg(test)]
mod tests;
