//! Agent directory

mod refresher;
mod registry;

pub use refresher::run_agent_refresher;
pub use registry::AgentRegistry;
