//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use wp_protocol::AgentHello;

/// Unique tag identifying an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentTag(pub String);

impl AgentTag {
    /// Create a new agent tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the raw tag string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Process the agent runs as
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Command line
    pub cmdline: String,
    /// Process id
    pub pid: u32,
    /// Parent process name
    pub parent: String,
    /// Parent process id
    pub ppid: u32,
}

/// A connected agent, as reported by the agent itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique tag
    pub tag: AgentTag,
    /// Hostname
    pub hostname: String,
    /// Operating system, lowercase (e.g. "linux")
    pub os: String,
    /// User the agent runs as
    pub user: String,
    /// Agent process
    pub process: ProcessInfo,
    /// IP addresses of the agent machine
    pub ips: Vec<String>,
    /// Address the agent connected from
    pub from: String,
    /// Transport the agent uses
    pub transport: String,
}

impl Agent {
    /// Create an agent with only a tag and OS, mostly useful in tests
    pub fn new(tag: impl Into<AgentTag>, os: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            hostname: String::new(),
            os: os.into().to_lowercase(),
            user: String::new(),
            process: ProcessInfo::default(),
            ips: vec![],
            from: String::new(),
            transport: String::new(),
        }
    }

    /// Build an agent record from its `Hello` frame
    pub fn from_hello(hello: AgentHello, from: impl Into<String>, transport: impl Into<String>) -> Self {
        Self {
            tag: AgentTag(hello.tag),
            hostname: hello.hostname,
            os: hello.os.to_lowercase(),
            user: hello.user,
            process: ProcessInfo {
                cmdline: hello.cmdline,
                pid: hello.pid,
                parent: hello.parent,
                ppid: hello.ppid,
            },
            ips: hello.ips,
            from: from.into(),
            transport: transport.into(),
        }
    }

    /// Whether a module declared for `platform` can run on this agent
    ///
    /// `generic` runs anywhere; anything else must equal the agent's OS,
    /// ignoring case.
    pub fn supports_platform(&self, platform: &str) -> bool {
        platform.eq_ignore_ascii_case("generic") || platform.eq_ignore_ascii_case(&self.os)
    }
}

/// Transport protocol of a port-forward session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stream relaying
    #[default]
    Tcp,
    /// Datagram relaying
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Direction of a port-forward session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local listener, destination reachable from the agent
    Forward,
    /// Agent-side listener, destination reachable from the coordinator
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_matching() {
        let linux = Agent::new("a", "Linux");
        assert!(linux.supports_platform("generic"));
        assert!(linux.supports_platform("LINUX"));
        assert!(!linux.supports_platform("windows"));
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_agent_from_hello() {
        let hello = AgentHello {
            tag: "agent-1".into(),
            os: "Windows".into(),
            pid: 42,
            ips: vec!["10.0.0.2".into()],
            ..Default::default()
        };
        let agent = Agent::from_hello(hello, "203.0.113.9:5555", "tcp");
        assert_eq!(agent.tag.as_str(), "agent-1");
        assert_eq!(agent.os, "windows");
        assert_eq!(agent.process.pid, 42);
        assert_eq!(agent.from, "203.0.113.9:5555");
    }
}
