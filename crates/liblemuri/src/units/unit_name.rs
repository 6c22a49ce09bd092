//! Object paths and display names of units on the session bus.

use crate::units::{UnitKind, UnitSource};
use regex::Regex;
use std::sync::OnceLock;

pub const OBJECT_PATH_PREFIX: &str = "/org/lemuri";

fn non_path_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^A-Za-z0-9_]").expect("static regex is valid"))
}

/// Replace everything that is not allowed in an object path element.
#[must_use]
pub fn escape_path_element(raw: &str) -> String {
    let escaped = non_path_chars().replace_all(raw, "_").into_owned();
    if escaped.is_empty() {
        "_".to_owned()
    } else {
        escaped
    }
}

#[must_use]
pub const fn namespace(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Session => "shell_units",
        UnitKind::Service => "service_units",
        UnitKind::Autostart => "application_units",
        UnitKind::Custom => "custom_units",
    }
}

/// `/org/lemuri/<namespace>/<leaf>`. The leaf is the descriptor file name up
/// to its first dot, or the whole command for ad hoc units.
#[must_use]
pub fn object_path(kind: UnitKind, source: &UnitSource) -> String {
    let leaf = match source {
        UnitSource::FileDescriptor { path, .. } => {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let base_name = file_name.split('.').next().unwrap_or_default().to_owned();
            escape_path_element(&base_name)
        }
        UnitSource::AdHocCommand(cmd) => escape_path_element(cmd),
    };
    format!("{}/{}/{}", OBJECT_PATH_PREFIX, namespace(kind), leaf)
}

/// The value of the published `Name` property.
#[must_use]
pub fn display_name(source: &UnitSource) -> String {
    match source {
        UnitSource::FileDescriptor { path, .. } => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        UnitSource::AdHocCommand(cmd) => cmd.clone(),
    }
}
