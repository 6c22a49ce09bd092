//! Parse descriptor files. These are INI files with a `[Desktop Entry]`
//! group, the same format XDG autostart entries use.

use log::trace;

use crate::units::{UnitDescriptor, UnitType};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

pub type ParsedSection = HashMap<String, Vec<(u32, String)>>;
pub type ParsedFile = HashMap<String, ParsedSection>;

pub const DESKTOP_ENTRY_SECTION: &str = "[Desktop Entry]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsingErrorReason {
    SectionTooOften(String),
    SectionNotFound(String),
    MalformedLine(u32, String),
    Io(String),
}

#[derive(Debug)]
pub struct ParsingError {
    inner: ParsingErrorReason,
    path: PathBuf,
}

impl ParsingError {
    #[must_use]
    pub const fn new(reason: ParsingErrorReason, path: PathBuf) -> Self {
        Self {
            inner: reason,
            path,
        }
    }

    #[must_use]
    pub const fn reason(&self) -> &ParsingErrorReason {
        &self.inner
    }
}

impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.inner {
            ParsingErrorReason::SectionTooOften(name) => {
                write!(f, "In file {:?}: section {} occurs multiple times", self.path, name)
            }
            ParsingErrorReason::SectionNotFound(name) => {
                write!(f, "In file {:?}: section {} not found", self.path, name)
            }
            ParsingErrorReason::MalformedLine(line, content) => {
                write!(f, "In file {:?}: line {} is malformed: {}", self.path, line, content)
            }
            ParsingErrorReason::Io(e) => {
                write!(f, "Could not read file {:?}: {}", self.path, e)
            }
        }
    }
}

impl std::error::Error for ParsingError {}

pub fn parse_file(content: &str) -> Result<ParsedFile, ParsingErrorReason> {
    let mut sections = ParsedFile::new();
    let mut current: Option<(String, ParsedSection)> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            if let Some((name, section)) = current.take() {
                insert_section(&mut sections, name, section)?;
            }
            current = Some((line.to_owned(), ParsedSection::new()));
            continue;
        }

        // lines before the first section are ignored
        let Some((_, section)) = current.as_mut() else {
            continue;
        };

        let Some((key, value)) = line.split_once('=') else {
            return Err(ParsingErrorReason::MalformedLine(line_no, line.to_owned()));
        };
        section
            .entry(key.trim().to_owned())
            .or_default()
            .push((line_no, value.trim().to_owned()));
    }

    if let Some((name, section)) = current.take() {
        insert_section(&mut sections, name, section)?;
    }

    Ok(sections)
}

fn insert_section(
    sections: &mut ParsedFile,
    name: String,
    section: ParsedSection,
) -> Result<(), ParsingErrorReason> {
    if sections.contains_key(&name) {
        return Err(ParsingErrorReason::SectionTooOften(name));
    }
    sections.insert(name, section);
    Ok(())
}

/// Returns the last value set for `key`, later lines override earlier ones.
#[must_use]
pub fn last_value<'a>(section: &'a ParsedSection, key: &str) -> Option<&'a str> {
    section
        .get(key)
        .and_then(|values| values.last())
        .map(|(_, value)| value.as_str())
}

#[must_use]
pub fn string_to_bool(s: &str) -> bool {
    let s_upper = s.trim().to_uppercase();
    s_upper == "YES" || s_upper == "TRUE" || s_upper == "1"
}

fn split_set(value: Option<&str>, separator: char) -> BTreeSet<String> {
    value
        .unwrap_or_default()
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn parse_descriptor(parsed_file: &ParsedFile) -> Result<UnitDescriptor, ParsingErrorReason> {
    let section = parsed_file.get(DESKTOP_ENTRY_SECTION).ok_or_else(|| {
        ParsingErrorReason::SectionNotFound(DESKTOP_ENTRY_SECTION.to_owned())
    })?;

    Ok(UnitDescriptor {
        exec: last_value(section, "Exec").unwrap_or_default().to_owned(),
        dbus_exec: last_value(section, "DBusExec").unwrap_or_default().to_owned(),
        session_requires: split_set(last_value(section, "DBusSessionRequires"), ' '),
        system_requires: split_set(last_value(section, "DBusSystemRequires"), ' '),
        only_show_in: split_set(last_value(section, "OnlyShowIn"), ';'),
        enabled: last_value(section, "Enabled").is_some_and(string_to_bool),
        unit_type: last_value(section, "Type").and_then(UnitType::from_setting),
    })
}

pub fn load_descriptor(path: &Path) -> Result<UnitDescriptor, ParsingError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ParsingError::new(ParsingErrorReason::Io(e.to_string()), path.to_owned()))?;
    let parsed_file =
        parse_file(&content).map_err(|reason| ParsingError::new(reason, path.to_owned()))?;
    let descriptor = parse_descriptor(&parsed_file)
        .map_err(|reason| ParsingError::new(reason, path.to_owned()))?;
    trace!("Loaded descriptor {path:?}: {descriptor:?}");
    Ok(descriptor)
}
