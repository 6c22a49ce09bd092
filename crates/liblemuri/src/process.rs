//! Spawning and signalling the processes behind units.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::{Command, Stdio};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commandline {
    pub cmd: String,
    pub args: Vec<String>,
}

impl Commandline {
    /// Split an `Exec=` line the way a shell would, without expanding anything.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut split = shlex::split(raw)
            .ok_or_else(|| format!("Could not parse cmdline: {raw}"))?
            .into_iter();
        let cmd = split
            .next()
            .ok_or_else(|| format!("Empty cmdline: {raw:?}"))?;
        Ok(Self {
            cmd,
            args: split.collect(),
        })
    }
}

impl Commandline {
    /// Removes desktop entry field codes (`%f`, `%U`, `%i`, ...) from the
    /// arguments. Nothing is substituted for them, `%%` becomes `%`.
    /// Arguments that consisted only of field codes are dropped.
    #[must_use]
    pub fn without_field_codes(self) -> Self {
        let args = self
            .args
            .into_iter()
            .filter_map(|arg| {
                let (stripped, had_code) = strip_field_codes(&arg);
                if had_code && stripped.is_empty() {
                    None
                } else {
                    Some(stripped)
                }
            })
            .collect();
        Self {
            cmd: self.cmd,
            args,
        }
    }
}

fn strip_field_codes(arg: &str) -> (String, bool) {
    let mut out = String::with_capacity(arg.len());
    let mut had_code = false;
    let mut chars = arg.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(code) if code.is_ascii_alphabetic() => {
                chars.next();
                had_code = true;
            }
            _ => out.push('%'),
        }
    }
    (out, had_code)
}

impl std::fmt::Display for Commandline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cmd)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The process operations a supervisor needs. Exits are not reported here,
/// they arrive as `ChildExited` events from the signal handler.
pub trait ProcessLauncher {
    fn spawn(&mut self, cmdline: &Commandline) -> std::io::Result<Pid>;
    fn terminate(&mut self, pid: Pid) -> Result<(), nix::Error>;
}

/// Launches real processes. stdout and stderr are forwarded to ours.
#[derive(Debug, Default)]
pub struct OsProcessLauncher;

impl ProcessLauncher for OsProcessLauncher {
    fn spawn(&mut self, cmdline: &Commandline) -> std::io::Result<Pid> {
        let child = Command::new(&cmdline.cmd)
            .args(&cmdline.args)
            .stdin(Stdio::null())
            .spawn()?;
        // The child is reaped by the signal handler with waitpid, the handle
        // must not be waited on.
        let pid = Pid::from_raw(child.id() as i32);
        drop(child);
        Ok(pid)
    }

    fn terminate(&mut self, pid: Pid) -> Result<(), nix::Error> {
        kill(pid, Signal::SIGTERM)
    }
}
