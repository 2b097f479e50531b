//! Transport traits

use async_trait::async_trait;

use wp_protocol::{CommandId, Envelope};

use crate::error::TransportError;
use crate::types::AgentTag;

/// Opaque "send envelope to agent" primitive
///
/// `send` returns once the envelope is accepted for sending. It says
/// nothing about delivery; replies arrive later through the broker's
/// delivery callback.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand an envelope to the transport
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Something that can address a command line to an agent
///
/// Relays receive this as an injected dependency so that they never build
/// their own transport.
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Send `payload` to `target` under correlation id `id`
    async fn send_command(
        &self,
        payload: &str,
        id: &CommandId,
        target: &AgentTag,
    ) -> Result<(), TransportError>;
}
