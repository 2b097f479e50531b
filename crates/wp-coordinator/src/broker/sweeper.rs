//! Orphaned result eviction task
//!
//! Fire-and-forget commands still get replies, and nobody ever collects
//! them. Results older than the TTL are dropped periodically so the table
//! cannot grow without bound.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::CommandBroker;

/// Run the result sweeper until cancelled.
pub async fn run_result_sweeper(
    broker: Arc<CommandBroker>,
    ttl: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    tracing::info!(
        "Starting result sweeper (ttl: {:?}, check interval: {:?})",
        ttl,
        interval
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = broker.evict_older_than(ttl);
                if evicted > 0 {
                    tracing::info!("Evicted {} uncollected command results", evicted);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Result sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wp_core::traits::Transport;
    use wp_core::TransportError;
    use wp_protocol::{CommandId, Envelope};

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _envelope: Envelope) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_and_stops() {
        let broker = Arc::new(CommandBroker::new(
            Arc::new(NullTransport),
            Duration::from_millis(10),
        ));
        broker.deliver_result(CommandId::generate(), "orphan".into());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_result_sweeper(
            Arc::clone(&broker),
            Duration::from_secs(30),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(broker.pending(), 0);

        cancel.cancel();
        task.await.unwrap();
    }
}
