//! Agent directory source

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Agent, AgentTag};

/// Where the coordinator learns which agents are connected
#[async_trait]
pub trait AgentSource: Send + Sync {
    /// Fetch the current list of connected agents
    async fn fetch_agents(&self) -> Result<Vec<Agent>, TransportError>;

    /// Whether `tag` is connected right now, regardless of earlier listings
    fn is_connected(&self, tag: &AgentTag) -> bool;
}
