use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single resolved configuration value.
///
/// Values start life as strings; the resolver coerces them to richer shapes
/// using a [`Schema`]. Accessors are lenient: asking a `Str` for a list
/// splits it, asking a `Bool` for a string renders it, so callers never have
/// to match on the variant themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    List(Vec<String>),
    Dict(BTreeMap<String, String>),
    Str(String),
}

impl Value {
    pub fn as_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::List(items) => items.join("\n"),
            Value::Dict(map) => map
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => str_to_bool(s),
            Value::List(items) => !items.is_empty(),
            Value::Dict(map) => !map.is_empty(),
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.clone(),
            Value::Str(s) => str_to_list(s),
            Value::Bool(_) | Value::Dict(_) => Vec::new(),
        }
    }

    pub fn as_dict(&self) -> BTreeMap<String, String> {
        match self {
            Value::Dict(map) => map.clone(),
            Value::Str(s) => str_to_dict(s),
            Value::Bool(_) | Value::List(_) => BTreeMap::new(),
        }
    }

    /// Truthiness used by template conditionals: empty strings, empty
    /// collections, and false are all falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.trim().is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(map) => !map.is_empty(),
        }
    }
}

/// Semantic type of a configuration key, used for coercion after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Bool,
    /// Newline-separated list, empty lines removed.
    List,
    /// Comma-separated list, empty items removed.
    CsvList,
    /// One `key=value` entry per line.
    Dict,
}

/// section -> key -> semantic type.
pub type Schema = BTreeMap<String, BTreeMap<String, ValueKind>>;

/// Deep-merge `extension` into `base`: sections and keys from the extension
/// are added beside the base entries, and the extension wins on collisions.
pub fn merge_schema(base: &mut Schema, extension: &Schema) {
    for (section, keys) in extension {
        let entry = base.entry(section.clone()).or_default();
        for (key, kind) in keys {
            entry.insert(key.clone(), *kind);
        }
    }
}

pub fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "up" | "on"
    )
}

pub fn str_to_list(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn str_to_dict(value: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for item in str_to_list(value) {
        if let Some((key, val)) = item.split_once('=') {
            result.insert(key.trim().to_owned(), val.to_owned());
        }
    }
    result
}

/// The resolved configuration mapping: section -> key -> value.
///
/// Immutable for the duration of a packaging run except for plugin-injected
/// keys added before template rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    pub fn get_str(&self, section: &str, key: &str) -> String {
        self.get(section, key).map(Value::as_str).unwrap_or_default()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some_and(Value::as_bool)
    }

    pub fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get(section, key).map(Value::as_list).unwrap_or_default()
    }

    pub fn get_dict(&self, section: &str, key: &str) -> BTreeMap<String, String> {
        self.get(section, key).map(Value::as_dict).unwrap_or_default()
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        self.sections
            .entry(section.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
    }

    pub fn set_str(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.set(section, key, Value::Str(value.into()));
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, Value>> {
        self.sections.get(section)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, Value>)> {
        self.sections.iter()
    }

    /// Look up a setting, erroring when the section or key is absent.
    pub fn require(&self, section: &str, key: &str) -> Result<&Value, crate::ConfigError> {
        let entries = self
            .sections
            .get(section)
            .ok_or_else(|| crate::ConfigError::MissingSection(section.to_owned()))?;
        entries
            .get(key)
            .ok_or_else(|| crate::ConfigError::MissingSetting {
                section: section.to_owned(),
                key: key.to_owned(),
            })
    }

    /// Coerce every value to its schema kind in place. Keys absent from the
    /// schema stay strings; coercion never fails, it keeps the value as-is.
    pub fn cast_kinds(&mut self, schema: &Schema) {
        for (section, entries) in &mut self.sections {
            let Some(kinds) = schema.get(section) else {
                continue;
            };
            for (key, value) in entries.iter_mut() {
                let Some(kind) = kinds.get(key) else { continue };
                let raw = value.as_str();
                *value = match kind {
                    ValueKind::Str => Value::Str(raw),
                    ValueKind::Bool => Value::Bool(str_to_bool(&raw)),
                    ValueKind::List => Value::List(str_to_list(&raw)),
                    ValueKind::CsvList => Value::List(csv_list(&raw)),
                    ValueKind::Dict => Value::Dict(str_to_dict(&raw)),
                };
            }
        }
    }
}
