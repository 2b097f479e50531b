//! Message types exchanged on agent connections
//!
//! Agents only ever dial out. Each connection they open starts with one
//! frame that says what the connection is for:
//!
//! 1. `Hello`: a control connection. The coordinator answers `HelloAck`,
//!    then pushes `Command` envelopes and receives `Reply` frames keyed by
//!    command id, in any order.
//! 2. `LegOpen`: a tunnel leg for one relayed connection or UDP flow of a
//!    port-forward session. After `LegAck { accepted: true }` the
//!    connection carries raw relayed bytes and no more frames.
//!
//! `Heartbeat` / `HeartbeatAck` may be sent on control connections at any time.

use serde::{Deserialize, Serialize};

use crate::command::{CommandId, Envelope};

/// Current protocol version string, sent in `Hello`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Agent identifies itself on a control connection
    Hello = 0x01,
    /// Coordinator accepts or rejects a control connection
    HelloAck = 0x02,
    /// Command envelope (coordinator → agent)
    Command = 0x03,
    /// Command result (agent → coordinator)
    Reply = 0x04,
    /// Agent opens a tunnel leg
    LegOpen = 0x05,
    /// Coordinator accepts or rejects a tunnel leg
    LegAck = 0x06,
    /// Heartbeat ping
    Heartbeat = 0x07,
    /// Heartbeat acknowledgment
    HeartbeatAck = 0x08,
    /// Error response
    Error = 0xFF,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloAck),
            0x03 => Some(Self::Command),
            0x04 => Some(Self::Reply),
            0x05 => Some(Self::LegOpen),
            0x06 => Some(Self::LegAck),
            0x07 => Some(Self::Heartbeat),
            0x08 => Some(Self::HeartbeatAck),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// What an agent reports about itself when it connects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHello {
    /// Unique agent tag
    pub tag: String,
    /// Hostname of the agent machine
    pub hostname: String,
    /// Operating system (e.g. "linux", "windows")
    pub os: String,
    /// User the agent runs as
    pub user: String,
    /// Agent process command line
    pub cmdline: String,
    /// Agent process id
    pub pid: u32,
    /// Parent process name
    pub parent: String,
    /// Parent process id
    pub ppid: u32,
    /// IP addresses of the agent machine
    pub ips: Vec<String>,
    /// Protocol version, see [`PROTOCOL_VERSION`]
    pub version: String,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Agent registration
    Hello(AgentHello),

    /// Registration acknowledgment
    HelloAck {
        /// Whether registration was accepted
        accepted: bool,
        /// Reason if not accepted
        reason: Option<String>,
    },

    /// Command for the agent
    Command(Envelope),

    /// Result of an earlier command
    Reply {
        /// Id of the command this answers
        id: CommandId,
        /// Result text
        payload: String,
    },

    /// Open a tunnel leg for a port-forward session
    LegOpen {
        /// Port-forward session id
        session_id: String,
        /// Leg id; present when the coordinator asked for this leg,
        /// absent for legs the agent originates on reverse sessions
        leg_id: Option<String>,
    },

    /// Tunnel leg acknowledgment
    LegAck {
        /// Whether the leg was accepted
        accepted: bool,
        /// Reason if not accepted
        reason: Option<String>,
    },

    /// Heartbeat ping
    Heartbeat {
        /// Timestamp for latency measurement
        timestamp: u64,
    },

    /// Heartbeat acknowledgment
    HeartbeatAck {
        /// Echo of the original timestamp
        timestamp: u64,
    },

    /// Error response
    Error {
        /// Human-readable message
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::HelloAck { .. } => MessageType::HelloAck,
            Message::Command(_) => MessageType::Command,
            Message::Reply { .. } => MessageType::Reply,
            Message::LegOpen { .. } => MessageType::LegOpen,
            Message::LegAck { .. } => MessageType::LegAck,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::HeartbeatAck { .. } => MessageType::HeartbeatAck,
            Message::Error { .. } => MessageType::Error,
        }
    }
}
