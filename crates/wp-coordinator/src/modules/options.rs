//! Option values of the active module

use serde::Serialize;
use std::collections::BTreeMap;

use wp_core::ModuleError;

use super::manifest::{ModuleManifest, OptionSpec};

/// Name of the option that overrides where agents download a module from
pub const DOWNLOAD_ADDR: &str = "download_addr";

/// Name of the option holding arguments for an interactive module
pub const INTERACTIVE_ARGS: &str = "args";

/// Current value of one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionValue {
    pub description: String,
    pub value: String,
    pub allowed: Vec<String>,
}

impl From<&OptionSpec> for OptionValue {
    fn from(spec: &OptionSpec) -> Self {
        Self {
            description: spec.description.clone(),
            value: spec.default.clone(),
            allowed: spec.allowed.clone(),
        }
    }
}

/// Options of the active module, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionSet {
    options: BTreeMap<String, OptionValue>,
}

impl OptionSet {
    /// Defaults declared by a manifest
    pub fn from_manifest(manifest: &ModuleManifest) -> Self {
        Self {
            options: manifest
                .options
                .iter()
                .map(|(name, spec)| (name.clone(), OptionValue::from(spec)))
                .collect(),
        }
    }

    /// Add an option unless one with that name exists
    pub fn insert_if_missing(&mut self, name: &str, spec: &OptionSpec) -> bool {
        if self.options.contains_key(name) {
            return false;
        }
        self.options.insert(name.to_string(), OptionValue::from(spec));
        true
    }

    /// Set an option, checking it exists and the value is allowed
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ModuleError> {
        let option = self
            .options
            .get_mut(name)
            .ok_or_else(|| ModuleError::Configuration(format!("no such option: {}", name)))?;
        if !option.allowed.is_empty() && !option.allowed.iter().any(|v| v == value) {
            return Err(ModuleError::Configuration(format!(
                "{} must be one of: {}",
                name,
                option.allowed.join(", ")
            )));
        }
        option.value = value.to_string();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    /// Value of an option, empty if it is not declared
    pub fn value(&self, name: &str) -> &str {
        self.options.get(name).map(|o| o.value.as_str()).unwrap_or("")
    }

    /// Value of an option that must be set
    pub fn required(&self, name: &str) -> Result<&str, ModuleError> {
        match self.value(name) {
            "" => Err(ModuleError::Configuration(format!("option {} is required", name))),
            value => Ok(value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// `NAME=value,` for every option, in name order
    pub fn env_string(&self) -> String {
        self.options
            .iter()
            .map(|(name, option)| format!("{}={},", name, option.value))
            .collect()
    }
}

/// Parse an environment string produced by [`OptionSet::env_string`]
pub fn parse_env_str(env: &str) -> BTreeMap<String, String> {
    env.split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
