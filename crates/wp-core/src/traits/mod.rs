//! Collaborator traits
//!
//! The coordinator core never constructs its own transport, agent
//! directory or interactive client; it is handed implementations of
//! these traits.

mod agents;
mod bridge;
mod stream;
mod transport;

pub use agents::AgentSource;
pub use bridge::{BridgeRequest, InteractiveBridge};
pub use stream::{BoxedStream, TunnelStream};
pub use transport::{CommandSender, Transport};
