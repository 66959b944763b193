//! `key = value[, value...]` model configuration files.

use crate::error::{Result, SqwError};
use crate::model::Variable;
use std::path::Path;

/// One `key = value, ...` line.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigEntry {
    pub key: String,
    pub values: Vec<String>,
    /// 1-based source line.
    pub line: usize,
}

/// Parsed configuration file, entries in file order.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    entries: Vec<ConfigEntry>,
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SqwError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    /// Split every line on `=` and `,`. Blank lines and `#` comments are
    /// skipped, as are lines without a key.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .enumerate()
            .filter_map(|(idx, raw)| {
                let line = raw.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let mut toks = line.split(['=', ',']).map(str::trim);
                let key = toks.next().filter(|k| !k.is_empty())?;
                Some(ConfigEntry {
                    key: key.to_string(),
                    values: toks.filter(|t| !t.is_empty()).map(str::to_string).collect(),
                    line: idx + 1,
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.iter().rev().find(|e| e.key == key)
    }

    /// Entries as variables, multiple values joined by spaces.
    ///
    /// This is the same shape `set_vars` accepts, so a model applies its
    /// config file through its ordinary variable path.
    pub fn to_vars(&self) -> Vec<Variable> {
        self.entries
            .iter()
            .map(|e| Variable::new(&e.key, "", e.values.join(" ")))
            .collect()
    }
}
