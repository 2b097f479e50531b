//! Agent connection management

mod health;
mod pool;

pub use health::HealthMonitor;
pub use pool::{AgentConnection, AgentConnections, Registration};
