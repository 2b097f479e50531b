//! Periodic agent-list refresh

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wp_core::traits::AgentSource;

use super::AgentRegistry;

/// Refresh the registry from `source` every `interval` until cancelled.
pub async fn run_agent_refresher(
    registry: Arc<AgentRegistry>,
    source: Arc<dyn AgentSource>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    tracing::info!("Starting agent list refresher (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match source.fetch_agents().await {
                    Ok(agents) => {
                        let count = agents.len();
                        registry.replace_all(agents, |tag| source.is_connected(tag));
                        tracing::trace!("Agent list refreshed: {} agents", count);
                    }
                    Err(e) => tracing::warn!("Failed to refresh agent list: {}", e),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Agent list refresher shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use wp_core::{Agent, AgentTag, TransportError};

    struct FixedSource(Mutex<Vec<Agent>>);

    #[async_trait]
    impl AgentSource for FixedSource {
        async fn fetch_agents(&self) -> Result<Vec<Agent>, TransportError> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn is_connected(&self, tag: &AgentTag) -> bool {
            self.0.lock().unwrap().iter().any(|a| &a.tag == tag)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_tracks_source() {
        let registry = Arc::new(AgentRegistry::new());
        let source = Arc::new(FixedSource(Mutex::new(vec![Agent::new("a", "linux")])));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_agent_refresher(
            Arc::clone(&registry),
            source.clone(),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.len(), 1);

        *source.0.lock().unwrap() = vec![Agent::new("b", "linux"), Agent::new("c", "linux")];
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&AgentTag::new("a")).is_none());

        cancel.cancel();
        task.await.unwrap();
    }
}
