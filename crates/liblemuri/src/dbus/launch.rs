//! Start a session bus with `dbus-launch` when we were started without one.
//!
//! This is the only place that blocks: it runs once, before any unit or
//! helper thread exists, and waits at most [`LAUNCH_TIMEOUT`].

use log::{debug, warn};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub const SESSION_BUS_ADDRESS_VAR: &str = "DBUS_SESSION_BUS_ADDRESS";
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum LaunchError {
    NotFound(which::Error),
    Io(std::io::Error),
    TimedOut,
    NoAddress,
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(e) => write!(f, "dbus-launch not found: {e}"),
            Self::Io(e) => write!(f, "dbus-launch failed: {e}"),
            Self::TimedOut => write!(f, "dbus-launch did not finish within {LAUNCH_TIMEOUT:?}"),
            Self::NoAddress => write!(f, "dbus-launch did not print {SESSION_BUS_ADDRESS_VAR}"),
        }
    }
}

impl std::error::Error for LaunchError {}

impl From<std::io::Error> for LaunchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// `dbus-launch` prints `KEY=VALUE` lines. Values may contain `=` themselves.
#[must_use]
pub fn parse_launch_output(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

/// Makes sure `DBUS_SESSION_BUS_ADDRESS` is set, launching a bus if needed.
///
/// Must be called before any other thread is spawned, it modifies the
/// environment.
pub fn ensure_session_bus() -> Result<(), LaunchError> {
    if std::env::var_os(SESSION_BUS_ADDRESS_VAR).is_some() {
        return Ok(());
    }
    warn!("No session bus found, launching one");

    let binary = which::which("dbus-launch").map_err(LaunchError::NotFound)?;
    let mut child = Command::new(binary)
        .args(["--close-stderr", "--exit-with-session"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let start = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if start.elapsed() >= LAUNCH_TIMEOUT {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LaunchError::TimedOut);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_string(&mut output)?;
    }

    let vars = parse_launch_output(&output);
    if !vars.iter().any(|(key, _)| key == SESSION_BUS_ADDRESS_VAR) {
        return Err(LaunchError::NoAddress);
    }
    for (key, value) in vars {
        debug!("Setting {key}={value}");
        // SAFETY: called during startup before any other thread is spawned,
        // so nothing else reads the environment concurrently.
        unsafe { std::env::set_var(&key, &value) };
    }
    Ok(())
}
