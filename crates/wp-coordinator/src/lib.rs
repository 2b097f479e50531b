//! wp-coordinator: command correlation, module dispatch and port-forward
//! relaying for agents that can only dial out
//!
//! Agents connect to the coordinator; everything the coordinator asks of
//! them travels as command envelopes over that connection, and replies come
//! back out of order, keyed by command id. Port forwards ride extra
//! connections the agent opens on request.

pub mod agents;
pub mod bridge;
pub mod broker;
pub mod connection;
pub mod console;
pub mod modules;
pub mod server;
pub mod state;
pub mod tunnel;

pub use broker::CommandBroker;
pub use modules::{ModuleEngine, ModuleCatalogue};
pub use state::CoordinatorState;
pub use tunnel::TunnelRelay;
