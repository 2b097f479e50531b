//! wp-core: Core abstractions and configuration for waypost
//!
//! This crate provides shared types, errors, configuration and the traits
//! behind which the coordinator's external collaborators (transport, agent
//! directory, interactive client) live.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ModuleError, RelayError, TransportError, WaypostError};
pub use types::{Agent, AgentTag, Direction, Protocol};
