//! Configuration for lemuri-session.
//!
//! Everything that is specific to a session lives below the config root
//! (`/etc/lemuri` unless overridden):
//!
//! - `<session>.conf`: `[Desktop Entry]` group, `X-WindowManager=` is the
//!   command of the window manager
//! - `<session>.d/shell/`: shell unit descriptors
//! - `<session>.d/services/`: service unit descriptors
//!
//! XDG autostart entries are read from the fixed system directories.

use log::{trace, warn};
use std::path::{Path, PathBuf};

use crate::units::{DESKTOP_ENTRY_SECTION, last_value, parse_file};

pub const DEFAULT_CONFIG_ROOT: &str = "/etc/lemuri";

pub const AUTOSTART_DIRS: &[&str] = &["/etc/xdg/autostart", "/usr/share/autostart"];

#[derive(Debug)]
pub struct LoggingConfig {
    pub log_to_stdout: bool,
    pub log_file: Option<PathBuf>,
    pub level: log::LevelFilter,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub session_name: String,
    pub window_manager: Option<String>,
    pub shell_dir: PathBuf,
    pub services_dir: PathBuf,
    pub autostart_dirs: Vec<PathBuf>,
    /// Stop a unit as soon as one of its required bus services vanishes.
    pub shutdown_on_missing_deps: bool,
}

impl Config {
    /// The default layout below `config_root`, without a window manager.
    #[must_use]
    pub fn for_session(session_name: &str, config_root: &Path) -> Self {
        let session_dir = config_root.join(format!("{session_name}.d"));
        Self {
            session_name: session_name.to_owned(),
            window_manager: None,
            shell_dir: session_dir.join("shell"),
            services_dir: session_dir.join("services"),
            autostart_dirs: AUTOSTART_DIRS.iter().map(PathBuf::from).collect(),
            shutdown_on_missing_deps: false,
        }
    }
}

#[must_use]
pub fn session_config_path(session_name: &str, config_root: &Path) -> PathBuf {
    config_root.join(format!("{session_name}.conf"))
}

/// Reads `X-WindowManager=` from the session config. A missing file means no
/// window manager.
#[must_use]
pub fn read_window_manager(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            trace!("No session config at {path:?}: {e}");
            return None;
        }
    };
    let parsed_file = match parse_file(&content) {
        Ok(parsed_file) => parsed_file,
        Err(e) => {
            warn!("Ignoring malformed session config {path:?}: {e:?}");
            return None;
        }
    };
    parsed_file
        .get(DESKTOP_ENTRY_SECTION)
        .and_then(|section| last_value(section, "X-WindowManager"))
        .filter(|wm| !wm.is_empty())
        .map(ToOwned::to_owned)
}

pub struct ConfigArgs<'a> {
    pub session_name: &'a str,
    pub config_root: &'a Path,
    pub window_manager: Option<&'a str>,
    pub shutdown_on_missing_deps: bool,
    pub log_level: log::LevelFilter,
    pub log_file: Option<&'a Path>,
}

pub fn load_config(args: &ConfigArgs<'_>) -> (LoggingConfig, Config) {
    let mut config = Config::for_session(args.session_name, args.config_root);
    config.window_manager = match args.window_manager {
        Some(wm) => Some(wm.to_owned()),
        None => read_window_manager(&session_config_path(args.session_name, args.config_root)),
    };
    config.shutdown_on_missing_deps = args.shutdown_on_missing_deps;

    let logging_config = LoggingConfig {
        log_to_stdout: true,
        log_file: args.log_file.map(Path::to_path_buf),
        level: args.log_level,
    };

    (logging_config, config)
}
