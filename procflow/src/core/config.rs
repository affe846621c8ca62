//! Namespaced configuration blocks.
//!
//! A block maps keys to JSON values with a default and help text. Pipelines
//! merge their nodes' blocks under `node_name:key`, and composite processes
//! nest further, so `outer:inner:key` addresses a parameter two levels down.

use crate::errors::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Separator between a sub-block prefix and its keys.
pub const BLOCK_SEPARATOR: char = ':';

/// One configuration parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// The current value.
    pub value: Value,
    /// The value used when nothing else was set.
    pub default: Value,
    /// Help text.
    #[serde(default)]
    pub description: String,
}

/// A set of configuration parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigBlock {
    entries: BTreeMap<String, ConfigEntry>,
}

impl ConfigBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a parameter whose current value is its default.
    pub fn add_parameter(
        &mut self,
        key: impl Into<String>,
        default: impl Into<Value>,
        description: impl Into<String>,
    ) {
        let default = default.into();
        self.entries.insert(
            key.into(),
            ConfigEntry {
                value: default.clone(),
                default,
                description: description.into(),
            },
        );
    }

    /// Builder form of [`add_parameter`](Self::add_parameter).
    #[must_use]
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        default: impl Into<Value>,
        description: impl Into<String>,
    ) -> Self {
        self.add_parameter(key, default, description);
        self
    }

    /// Overrides the current value of a declared parameter.
    ///
    /// Unknown keys are ignored; use [`set`](Self::set) to have them reported.
    #[must_use]
    pub fn with_current(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value.into();
        }
        self
    }

    /// Sets the value of a declared parameter.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| ConfigError::unknown_key(key))?;
        entry.value = value.into();
        Ok(())
    }

    /// Reads a parameter as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.value(key).ok_or_else(|| ConfigError::unknown_key(key))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::invalid_value(key, e.to_string()))
    }

    /// Returns the raw value of a parameter.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Returns the full entry of a parameter.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    /// Returns true if the key is declared.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the block has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Extracts every entry under `prefix:` with the prefix stripped.
    #[must_use]
    pub fn subblock(&self, prefix: &str) -> Self {
        let lead = format!("{prefix}{BLOCK_SEPARATOR}");
        let entries = self
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                key.strip_prefix(&lead)
                    .map(|rest| (rest.to_string(), entry.clone()))
            })
            .collect();
        Self { entries }
    }

    /// Inserts every entry of `block` under `prefix:`.
    pub fn add_subblock(&mut self, block: &Self, prefix: &str) {
        for (key, entry) in &block.entries {
            self.entries
                .insert(format!("{prefix}{BLOCK_SEPARATOR}{key}"), entry.clone());
        }
    }

    /// Copies the values of `other` onto keys declared here.
    ///
    /// Fails without changing anything if `other` names an undeclared key.
    pub fn update(&mut self, other: &Self) -> Result<(), ConfigError> {
        if let Some(unknown) = other.keys().find(|key| !self.contains(key)) {
            return Err(ConfigError::unknown_key(unknown));
        }
        for (key, entry) in &other.entries {
            if let Some(mine) = self.entries.get_mut(key) {
                mine.value = entry.value.clone();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ConfigBlock {
        ConfigBlock::new()
            .with_parameter("threshold", 0.5, "Detection threshold")
            .with_parameter("enabled", true, "Whether the process runs")
            .with_parameter("label", "car", "Class label")
    }

    #[test]
    fn test_typed_get() {
        let block = sample();
        assert_eq!(block.get::<f64>("threshold").unwrap(), 0.5);
        assert!(block.get::<bool>("enabled").unwrap());
        assert_eq!(block.get::<String>("label").unwrap(), "car");
    }

    #[test]
    fn test_get_wrong_type_is_invalid_value() {
        let block = sample();
        let err = block.get::<u32>("label").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "label"));
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let mut block = sample();
        assert_eq!(
            block.set("missing", 1),
            Err(ConfigError::unknown_key("missing"))
        );
    }

    #[test]
    fn test_subblock_round_trip() {
        let mut merged = ConfigBlock::new();
        merged.add_subblock(&sample(), "detector");
        merged.add_subblock(&sample(), "tracker");

        assert!(merged.contains("detector:threshold"));
        assert_eq!(merged.len(), 6);

        let detector = merged.subblock("detector");
        assert_eq!(detector, sample());
    }

    #[test]
    fn test_nested_subblocks() {
        let mut inner = ConfigBlock::new();
        inner.add_subblock(&sample(), "node");
        let mut outer = ConfigBlock::new();
        outer.add_subblock(&inner, "super");

        assert!(outer.contains("super:node:label"));
        assert_eq!(outer.subblock("super").subblock("node"), sample());
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let mut block = sample();
        let bad = ConfigBlock::new()
            .with_parameter("threshold", 0.9, "")
            .with_parameter("bogus", 1, "");
        assert!(block.update(&bad).is_err());
        assert_eq!(block.get::<f64>("threshold").unwrap(), 0.5);
    }

    #[test]
    fn test_json_round_trip() {
        let block = sample().with_current("label", "truck");
        let json = serde_json::to_string(&block).unwrap();
        let back: ConfigBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
