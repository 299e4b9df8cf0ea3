//! INI syntax layer for the override file.
//!
//! `rust-ini` does the parsing; this module only folds the result into
//! lowercased section/key maps so [`super::Settings`] can validate values
//! against their declared types. Keys before the first header land in the
//! `""` section. Quote and escape processing are off: values reach the typed
//! layer exactly as written.

use ini::{Ini, ParseOption};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;

pub type IniSections = BTreeMap<String, BTreeMap<String, String>>;

pub fn parse(path: &Path, contents: &str) -> Result<IniSections, ConfigError> {
    let opt = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(contents, opt).map_err(|err| ConfigError::Syntax {
        path: path.to_path_buf(),
        line: err.line,
        text: err.msg.to_string(),
    })?;

    let mut sections = IniSections::new();
    for (section, props) in ini.iter() {
        let entries = sections
            .entry(section.unwrap_or_default().trim().to_ascii_lowercase())
            .or_default();
        for (key, value) in props.iter() {
            entries.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok(sections)
}
