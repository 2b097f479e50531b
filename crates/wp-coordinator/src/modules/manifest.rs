//! Module manifests (`config.json`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use wp_core::ModuleError;

/// Manifest file name inside a module directory
pub const MANIFEST_FILE: &str = "config.json";

/// `exec` value of modules handled inside the coordinator
pub const BUILTIN_EXEC: &str = "built-in";

/// Platform that runs on every agent OS
pub const GENERIC_PLATFORM: &str = "generic";

fn default_platform() -> String {
    GENERIC_PLATFORM.to_string()
}

/// A declared module option
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Help text; modules with an undocumented option are rejected
    #[serde(default, alias = "desc")]
    pub description: String,
    /// Default value
    #[serde(default, alias = "val")]
    pub default: String,
    /// Allowed values; empty means anything goes
    #[serde(default, alias = "vals")]
    pub allowed: Vec<String>,
}

impl OptionSpec {
    /// Create an option spec
    pub fn new(description: &str, default: &str) -> Self {
        Self {
            description: description.to_string(),
            default: default.to_string(),
            allowed: Vec::new(),
        }
    }

    /// Restrict the option to these values
    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// What the agent does with a shipped module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSideConfig {
    /// Executable (or command) started on the agent
    #[serde(default)]
    pub exec: String,
    /// Payload type understood by the agent's loader
    #[serde(default, rename = "type")]
    pub payload_type: String,
    /// Declared files; in-memory modules ship the first one
    #[serde(default)]
    pub files: Vec<String>,
    /// Load the payload without touching disk
    #[serde(default, alias = "inMemory")]
    pub in_memory: bool,
    /// The module serves an interactive shell
    #[serde(default, alias = "isInteractive")]
    pub is_interactive: bool,
}

/// A module manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name
    pub name: String,
    /// Target OS, or `generic`
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub comment: String,
    /// Build command run on the coordinator before dispatch
    #[serde(default)]
    pub build: String,
    /// Runs on the coordinator only; nothing is shipped to the agent
    #[serde(default, alias = "isLocal")]
    pub is_local: bool,
    /// Agent-side settings
    #[serde(default, alias = "agent_config")]
    pub agent: AgentSideConfig,
    /// Declared options
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
    /// Module directory (set when loaded)
    #[serde(skip)]
    pub path: PathBuf,
}

impl ModuleManifest {
    /// Create a manifest with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: default_platform(),
            author: String::new(),
            date: String::new(),
            comment: String::new(),
            build: String::new(),
            is_local: false,
            agent: AgentSideConfig::default(),
            options: BTreeMap::new(),
            path: PathBuf::new(),
        }
    }

    /// Read `<dir>/config.json`
    pub fn load(dir: &Path) -> Result<Self, ModuleError> {
        let file = dir.join(MANIFEST_FILE);
        let data = std::fs::read_to_string(&file)?;
        let mut manifest: ModuleManifest = serde_json::from_str(&data).map_err(|e| {
            ModuleError::Configuration(format!("{}: {}", file.display(), e))
        })?;
        manifest.path = dir.to_path_buf();
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject manifests with unnamed modules or undocumented options
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.name.trim().is_empty() {
            return Err(ModuleError::Configuration("module has no name".into()));
        }
        for (name, option) in &self.options {
            if option.description.is_empty() {
                return Err(ModuleError::Configuration(format!(
                    "{} config error: {} incomplete",
                    self.name, name
                )));
            }
        }
        Ok(())
    }

    /// Handled inside the coordinator
    pub fn is_builtin(&self) -> bool {
        self.agent.exec.eq_ignore_ascii_case(BUILTIN_EXEC)
    }

    /// Runs on every platform
    pub fn is_generic(&self) -> bool {
        self.platform.eq_ignore_ascii_case(GENERIC_PLATFORM)
    }

    /// Summary row: name, exec, platform, author, date, comment
    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            name: self.name.clone(),
            exec: self.agent.exec.clone(),
            platform: self.platform.clone(),
            author: self.author.clone(),
            date: self.date.clone(),
            comment: self.comment.clone(),
        }
    }
}

/// Module details as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub exec: String,
    pub platform: String,
    pub author: String,
    pub date: String,
    pub comment: String,
}
