//! Connection health monitoring

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::AgentConnections;

/// Drops agent connections that stopped sending heartbeats
pub struct HealthMonitor {
    /// How often connections are checked
    pub interval: Duration,
    /// Silence after which a connection is dropped
    pub timeout: Duration,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Disconnect every connection silent for longer than the timeout
    pub fn check(&self, connections: &AgentConnections) -> usize {
        let mut dropped = 0;
        for connection in connections.list() {
            if connection.idle_for() > self.timeout {
                tracing::warn!(
                    "Agent {} silent for {:?}, disconnecting",
                    connection.agent.tag,
                    connection.idle_for()
                );
                connection.disconnect();
                dropped += 1;
            }
        }
        dropped
    }

    /// Check connections periodically until cancelled
    pub async fn run(self, connections: Arc<AgentConnections>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(&connections);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("Health monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wp_core::Agent;

    #[test]
    fn test_fresh_connections_kept() {
        let pool = AgentConnections::new();
        let root = CancellationToken::new();
        let reg = pool.register(Agent::new("a", "linux"), &root);

        let monitor = HealthMonitor::new(Duration::from_secs(1), Duration::from_secs(90));
        assert_eq!(monitor.check(&pool), 0);
        assert!(!reg.cancel.is_cancelled());

        let strict = HealthMonitor::new(Duration::from_secs(1), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(strict.check(&pool), 1);
        assert!(reg.cancel.is_cancelled());
    }
}
