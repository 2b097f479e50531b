//! Core error types for waypost

use std::path::PathBuf;
use thiserror::Error;
use wp_protocol::ProtocolError;

/// Top-level error type for the waypost ecosystem
#[derive(Error, Debug)]
pub enum WaypostError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Module error
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// Relay error
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures handing a command to the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No live connection to the agent
    #[error("Agent offline: {0}")]
    AgentOffline(String),

    /// The connection to the agent went away while sending
    #[error("Channel to {0} closed")]
    ChannelClosed(String),

    /// The transport refused the envelope
    #[error("Send rejected: {0}")]
    Rejected(String),
}

/// Module selection, packaging and dispatch errors
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Unknown module, missing option or bad option value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No target selected, or the target cannot run the module
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    /// Build command exited non-zero
    #[error("Build of {module} failed:\n{output}")]
    BuildFailure {
        /// Module name
        module: String,
        /// Combined stdout/stderr of the build
        output: String,
    },

    /// Sending the start command failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The agent never answered in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Relay setup for a built-in module failed
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Packaging I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port-forward relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// The local listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The agent never opened the requested tunnel leg
    #[error("Tunnel leg {0} was not opened in time")]
    LegTimeout(String),

    /// Tunnel leg does not belong to any live session
    #[error("No session accepts leg for {0}")]
    UnknownLeg(String),

    /// The session was cancelled while the operation was in progress
    #[error("Session {0} cancelled")]
    Cancelled(String),

    /// No session with this id
    #[error("Port mapping not found: {0}")]
    SessionNotFound(String),

    /// No session matches an ad-hoc "off" request
    #[error("Could not find port mapping (to {to}, listening on {listen_port})")]
    NoMatchingSession {
        /// Requested destination
        to: String,
        /// Requested listen port
        listen_port: String,
    },

    /// Invalid session option
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Coordination command could not be sent
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
