//! Pending result table and the broker built around it

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use wp_core::traits::{CommandSender, Transport};
use wp_core::{AgentTag, TransportError};
use wp_protocol::{CommandId, Envelope};

/// A delivered reply nobody has collected yet
struct PendingResult {
    value: String,
    delivered_at: Instant,
}

/// Sends commands and correlates their out-of-order replies by id
///
/// Sending is fire-and-forget: `send` returns once the transport accepted
/// the envelope. Replies land in the result table through
/// [`deliver_result`](Self::deliver_result) and are consumed exactly once by
/// [`await_result`](Self::await_result).
pub struct CommandBroker {
    /// Transport that physically carries envelopes
    transport: Arc<dyn Transport>,
    /// Delivered, not yet collected results
    results: DashMap<CommandId, PendingResult>,
    /// How often `await_result` looks at the table
    poll_interval: Duration,
}

impl CommandBroker {
    /// Create a broker on top of a transport
    pub fn new(transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            results: DashMap::new(),
            poll_interval,
        }
    }

    /// Hand a command to the transport.
    ///
    /// No retry and no delivery confirmation; resubmitting is up to the caller.
    pub async fn send(
        &self,
        payload: &str,
        id: &CommandId,
        target: &AgentTag,
    ) -> Result<(), TransportError> {
        tracing::debug!(command_id = %id, agent = %target, "Sending command: {}", payload);
        let envelope = Envelope::new(id.clone(), target.as_str(), payload);
        self.transport.send(envelope).await.map_err(|e| {
            tracing::warn!(command_id = %id, agent = %target, "Send failed: {}", e);
            e
        })
    }

    /// Wait up to `timeout` for the result of `id`.
    ///
    /// On success the entry is removed before returning, so a second call for
    /// the same id gets `None`. On timeout nothing is left behind.
    pub async fn await_result(&self, id: &CommandId, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((_, result)) = self.results.remove(id) {
                tracing::trace!(command_id = %id, "Result collected");
                return Some(result.value);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(command_id = %id, "No result within {:?}", timeout);
                return None;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Send a command under a fresh id and wait for its result
    pub async fn send_and_await(
        &self,
        payload: &str,
        target: &AgentTag,
        timeout: Duration,
    ) -> Result<Option<String>, TransportError> {
        let id = CommandId::generate();
        self.send(payload, &id, target).await?;
        Ok(self.await_result(&id, timeout).await)
    }

    /// Store a reply delivered by the transport. Last writer wins.
    pub fn deliver_result(&self, id: CommandId, value: String) {
        let previous = self.results.insert(
            id.clone(),
            PendingResult {
                value,
                delivered_at: Instant::now(),
            },
        );
        if previous.is_some() {
            tracing::debug!(command_id = %id, "Duplicate delivery overwrote earlier result");
        }
    }

    /// Drop the result for `id` if one is stored
    pub fn discard(&self, id: &CommandId) -> bool {
        self.results.remove(id).is_some()
    }

    /// Evict results that have waited longer than `ttl`
    pub fn evict_older_than(&self, ttl: Duration) -> usize {
        let before = self.results.len();
        self.results
            .retain(|_, result| result.delivered_at.elapsed() <= ttl);
        before.saturating_sub(self.results.len())
    }

    /// Number of uncollected results
    pub fn pending(&self) -> usize {
        self.results.len()
    }
}

#[async_trait]
impl CommandSender for CommandBroker {
    async fn send_command(
        &self,
        payload: &str,
        id: &CommandId,
        target: &AgentTag,
    ) -> Result<(), TransportError> {
        self.send(payload, id, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Envelope>>,
        offline: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
            if self.offline {
                return Err(TransportError::AgentOffline(envelope.target));
            }
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn broker() -> (Arc<RecordingTransport>, Arc<CommandBroker>) {
        let transport = Arc::new(RecordingTransport::default());
        let broker = Arc::new(CommandBroker::new(
            transport.clone(),
            Duration::from_millis(10),
        ));
        (transport, broker)
    }

    #[tokio::test]
    async fn test_send_builds_envelope() {
        let (transport, broker) = broker();
        let id = CommandId::generate();
        broker
            .send("ls /tmp", &id, &AgentTag::new("agent-a"))
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, id);
        assert_eq!(sent[0].target, "agent-a");
        assert_eq!(sent[0].payload, "ls /tmp");
    }

    #[tokio::test]
    async fn test_send_reports_transport_rejection() {
        let transport = Arc::new(RecordingTransport {
            offline: true,
            ..Default::default()
        });
        let broker = CommandBroker::new(transport, Duration::from_millis(10));
        let err = broker
            .send("ps", &CommandId::generate(), &AgentTag::new("gone"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::AgentOffline("gone".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_consumed_exactly_once() {
        let (_, broker) = broker();
        let id = CommandId::generate();

        let waiter = {
            let broker = Arc::clone(&broker);
            let id = id.clone();
            tokio::spawn(async move { broker.await_result(&id, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.deliver_result(id.clone(), "done".into());

        assert_eq!(waiter.await.unwrap().as_deref(), Some("done"));
        assert_eq!(broker.await_result(&id, Duration::from_millis(50)).await, None);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_nothing_behind() {
        let (_, broker) = broker();
        let id = CommandId::generate();
        assert_eq!(broker.await_result(&id, Duration::from_millis(200)).await, None);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_delivery_is_reclaimed_by_next_wait() {
        let (_, broker) = broker();
        let id = CommandId::generate();
        assert_eq!(broker.await_result(&id, Duration::from_millis(100)).await, None);

        broker.deliver_result(id.clone(), "late".into());
        assert_eq!(broker.pending(), 1);
        assert_eq!(
            broker.await_result(&id, Duration::from_millis(100)).await.as_deref(),
            Some("late")
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_last_writer_wins() {
        let (_, broker) = broker();
        let id = CommandId::generate();
        broker.deliver_result(id.clone(), "first".into());
        broker.deliver_result(id.clone(), "second".into());
        assert_eq!(broker.pending(), 1);
        assert_eq!(
            broker.await_result(&id, Duration::ZERO).await.as_deref(),
            Some("second")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_older_than() {
        let (_, broker) = broker();
        broker.deliver_result(CommandId::generate(), "old".into());
        tokio::time::advance(Duration::from_secs(120)).await;
        let fresh = CommandId::generate();
        broker.deliver_result(fresh.clone(), "fresh".into());

        assert_eq!(broker.evict_older_than(Duration::from_secs(60)), 1);
        assert_eq!(broker.pending(), 1);
        assert!(broker.discard(&fresh));
        assert!(!broker.discard(&fresh));
    }
}
