//! Command envelopes and correlation ids
//!
//! A command is a text line addressed to one agent. Only its id outlives
//! the send: replies come back later, out of order, keyed by that id.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tokenize::quote_arg;

/// Verb for port-forward control on the agent
pub const VERB_PORT_FWD: &str = "!port_fwd";
/// Verb for deleting a proxy-side port mapping on the agent
pub const VERB_DELETE_PORT_FWD: &str = "!delete_portfwd";
/// Verb for the agent-side SOCKS proxy
pub const VERB_PROXY: &str = "!proxy";
/// Verb for starting a packaged module on the agent
pub const VERB_CUSTOM_MODULE: &str = "!custom_module";

/// Globally unique command identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(String);

impl CommandId {
    /// Generate a fresh id. Ids are random v4 UUIDs and never reused.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an id received from the wire
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A command addressed to one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id for the eventual reply
    pub id: CommandId,
    /// Tag of the target agent
    pub target: String,
    /// Command line text
    pub payload: String,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(id: CommandId, target: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id,
            target: target.into(),
            payload: payload.into(),
        }
    }
}

/// Builder for agent command lines
///
/// Values are quoted with [`quote_arg`] so that the agent-side tokenizer
/// recovers them exactly.
#[derive(Debug, Clone)]
pub struct CommandLine {
    line: String,
}

impl CommandLine {
    /// Start a command line with the given verb
    pub fn new(verb: &str) -> Self {
        Self {
            line: verb.to_string(),
        }
    }

    /// Append `--name value`
    pub fn opt(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.line.push_str(" --");
        self.line.push_str(name);
        self.line.push(' ');
        self.line.push_str(&quote_arg(value.as_ref()));
        self
    }

    /// Append a bare `--name` switch
    pub fn flag(mut self, name: &str) -> Self {
        self.line.push_str(" --");
        self.line.push_str(name);
        self
    }

    /// Append `--name value` only when the value is non-empty
    pub fn opt_if_set(self, name: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.opt(name, value)
        }
    }

    /// Finish the command line
    pub fn build(self) -> String {
        self.line
    }
}
