//! Live agent control connections

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wp_core::time::{current_time_millis, elapsed_millis};
use wp_core::traits::{AgentSource, Transport};
use wp_core::{Agent, AgentTag, TransportError};
use wp_protocol::Envelope;

/// Envelopes queued per connection before senders wait
const OUTBOUND_QUEUE: usize = 256;

/// One agent's control connection
pub struct AgentConnection {
    /// Agent as it introduced itself
    pub agent: Agent,
    /// Distinguishes a reconnect from the connection it replaced
    pub conn_id: u64,
    /// Envelopes waiting to be written to the agent
    tx: mpsc::Sender<Envelope>,
    /// Drops the connection when cancelled
    cancel: CancellationToken,
    /// Last frame from the agent (ms since epoch)
    last_seen: AtomicU64,
}

impl AgentConnection {
    /// Record traffic from the agent
    pub fn touch(&self) {
        self.last_seen.store(current_time_millis(), Ordering::Relaxed);
    }

    /// Time since the agent was last heard from
    pub fn idle_for(&self) -> Duration {
        Duration::from_millis(elapsed_millis(self.last_seen.load(Ordering::Relaxed)))
    }

    /// Close the connection
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

/// What the connection handler keeps after registering
pub struct Registration {
    pub connection: Arc<AgentConnection>,
    pub outbound: mpsc::Receiver<Envelope>,
    pub cancel: CancellationToken,
}

/// Control connections indexed by agent tag
///
/// This is the reference [`Transport`]: sending an envelope means queueing
/// it on the agent's connection.
pub struct AgentConnections {
    connections: DashMap<AgentTag, Arc<AgentConnection>>,
    next_id: AtomicU64,
}

impl AgentConnections {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a control connection, replacing any older one for the tag
    pub fn register(&self, agent: Agent, parent: &CancellationToken) -> Registration {
        let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE);
        let cancel = parent.child_token();
        let connection = Arc::new(AgentConnection {
            agent,
            conn_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tx,
            cancel: cancel.clone(),
            last_seen: AtomicU64::new(current_time_millis()),
        });

        if let Some(old) = self
            .connections
            .insert(connection.agent.tag.clone(), Arc::clone(&connection))
        {
            tracing::info!("Agent {} reconnected, dropping old connection", old.agent.tag);
            old.disconnect();
        }

        Registration {
            connection,
            outbound,
            cancel,
        }
    }

    /// Remove a connection unless a newer one already replaced it
    pub fn unregister(&self, tag: &AgentTag, conn_id: u64) -> bool {
        self.connections
            .remove_if(tag, |_, c| c.conn_id == conn_id)
            .is_some()
    }

    pub fn get(&self, tag: &AgentTag) -> Option<Arc<AgentConnection>> {
        self.connections.get(tag).map(|r| Arc::clone(&r))
    }

    /// All connections
    pub fn list(&self) -> Vec<Arc<AgentConnection>> {
        self.connections.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of connected agents
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no agent is connected
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for AgentConnections {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for AgentConnections {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let tag = AgentTag::new(envelope.target.clone());
        let connection = self
            .get(&tag)
            .ok_or_else(|| TransportError::AgentOffline(envelope.target.clone()))?;
        connection
            .tx
            .send(envelope)
            .await
            .map_err(|e| TransportError::ChannelClosed(e.0.target))
    }
}

#[async_trait]
impl AgentSource for AgentConnections {
    async fn fetch_agents(&self) -> Result<Vec<Agent>, TransportError> {
        Ok(self.list().iter().map(|c| c.agent.clone()).collect())
    }

    fn is_connected(&self, tag: &AgentTag) -> bool {
        self.connections.contains_key(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wp_protocol::CommandId;

    #[tokio::test]
    async fn test_send_queues_on_connection() {
        let pool = AgentConnections::new();
        let root = CancellationToken::new();
        let mut reg = pool.register(Agent::new("a", "linux"), &root);

        let envelope = Envelope::new(CommandId::generate(), "a", "ps");
        pool.send(envelope.clone()).await.unwrap();
        assert_eq!(reg.outbound.recv().await.unwrap(), envelope);

        let offline = Envelope::new(CommandId::generate(), "b", "ps");
        assert_eq!(
            pool.send(offline).await.unwrap_err(),
            TransportError::AgentOffline("b".into())
        );
    }

    #[tokio::test]
    async fn test_reconnect_replaces_old_connection() {
        let pool = AgentConnections::new();
        let root = CancellationToken::new();
        let first = pool.register(Agent::new("a", "linux"), &root);
        let second = pool.register(Agent::new("a", "linux"), &root);

        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        // the old handler exiting must not remove the new connection
        assert!(!pool.unregister(&AgentTag::new("a"), first.connection.conn_id));
        assert_eq!(pool.len(), 1);
        assert!(pool.unregister(&AgentTag::new("a"), second.connection.conn_id));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_reported() {
        let pool = AgentConnections::new();
        let root = CancellationToken::new();
        let reg = pool.register(Agent::new("a", "linux"), &root);
        drop(reg.outbound);

        let err = pool
            .send(Envelope::new(CommandId::generate(), "a", "ps"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::ChannelClosed("a".into()));
        assert_eq!(pool.fetch_agents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_listing_keeps_newly_registered_agent() {
        let pool = AgentConnections::new();
        let registry = crate::agents::AgentRegistry::new();
        let root = CancellationToken::new();
        let _a = pool.register(Agent::new("a", "linux"), &root);
        registry.insert(Agent::new("a", "linux"));

        let listing = pool.fetch_agents().await.unwrap();

        // "b" connects between the listing and the refresh
        let _b = pool.register(Agent::new("b", "linux"), &root);
        registry.insert(Agent::new("b", "linux"));
        registry.set_active(&AgentTag::new("b"));

        registry.replace_all(listing, |tag| pool.is_connected(tag));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_agent().unwrap().tag.as_str(), "b");
    }
}
