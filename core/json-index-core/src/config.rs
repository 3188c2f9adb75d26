use crate::error::{Error, Result};
use crate::registry::{AlgorithmFactories, ResolverFactories};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const KEY_NAME: &str = "resourceName";
pub const KEY_TARGET_TYPE: &str = "resourceObject";
pub const KEY_ROOT_NODE: &str = "rootNode";
pub const KEY_UNIQUE_FIELDS: &str = "uniqueField";
pub const KEY_ALGORITHM: &str = "algorithm.class";
pub const KEY_RESOLVER: &str = "resolver.class";

const META_KEYS: &[&str] = &[
    KEY_NAME,
    KEY_TARGET_TYPE,
    KEY_ROOT_NODE,
    KEY_UNIQUE_FIELDS,
    KEY_ALGORITHM,
    KEY_RESOLVER,
];

const MANDATORY_KEYS: &[&str] = &[
    KEY_NAME,
    KEY_TARGET_TYPE,
    KEY_ROOT_NODE,
    KEY_ALGORITHM,
    KEY_RESOLVER,
];

/// Raw key/value record describing one resource, as read from a `.j2l` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    entries: Vec<(String, String)>,
}

impl ResourceConfig {
    /// Parse properties text: `key = value` or `key: value` per line, `#` and
    /// `!` start comments, later keys override earlier ones.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = ResourceConfig::default();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                return Err(Error::config(format!(
                    "line {}: expected `key = value`, found `{line}`",
                    number + 1
                )));
            };
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            if key.is_empty() {
                return Err(Error::config(format!("line {}: empty key", number + 1)));
            }
            config.set(key, value);
        }
        Ok(config)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|err| match err {
            Error::Configuration(msg) => {
                Error::config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Entries that declare searchable fields, in declaration order.
    pub fn field_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(key, _)| !META_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn unique_fields(&self) -> Vec<&str> {
        self.get(KEY_UNIQUE_FIELDS)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn build(
        &self,
        algorithms: &AlgorithmFactories,
        resolvers: &ResolverFactories,
    ) -> Result<Resource> {
        for key in MANDATORY_KEYS {
            if self.get(key).map_or(true, |value| value.is_empty()) {
                return Err(Error::config(format!(
                    "missing mandatory `{key}` property"
                )));
            }
        }
        let required = |key: &str| self.get(key).unwrap_or_default();

        let unique = self.unique_fields();
        for name in &unique {
            if !self.field_entries().any(|(field, _)| field == *name) {
                return Err(Error::config(format!(
                    "`{KEY_UNIQUE_FIELDS}` names `{name}` which has no path expression"
                )));
            }
        }

        let mut resource = Resource::builder(required(KEY_NAME))
            .root_node(required(KEY_ROOT_NODE))
            .target_type(required(KEY_TARGET_TYPE))
            .algorithm(algorithms.create(required(KEY_ALGORITHM))?)
            .resolver(resolvers.create(required(KEY_RESOLVER))?)
            .build()?;

        for (name, expression) in self.field_entries() {
            resource.add_field_definition(name, expression, unique.contains(&name))?;
        }
        Ok(resource)
    }
}
