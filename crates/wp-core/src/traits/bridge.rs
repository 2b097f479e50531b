//! Interactive bridge

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::AgentTag;

/// Parameters for opening an interactive session to a module on an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    /// Agent running the module
    pub agent: AgentTag,
    /// Path of the module executable on the agent
    pub exec_path: String,
    /// User-supplied arguments
    pub args: String,
    /// Port chosen for this bridge
    pub port: u16,
}

/// SSH-like client that attaches the operator to an interactive module
#[async_trait]
pub trait InteractiveBridge: Send + Sync {
    /// Open the bridge; returns when the interactive session ends
    async fn open(&self, request: BridgeRequest) -> Result<(), TransportError>;
}
