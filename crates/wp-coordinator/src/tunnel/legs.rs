//! Tunnel leg routing
//!
//! Agents never accept connections, so every relayed byte stream is opened
//! by the agent and announced with a `LegOpen` frame. The router decides
//! which waiting relay gets it:
//! - legs the coordinator asked for (forward sessions) carry a leg id and
//!   complete a one-shot wait,
//! - legs without an id belong to a reverse session and are queued to it.

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use wp_core::traits::BoxedStream;
use wp_core::RelayError;

/// Queue depth for unsolicited legs of one reverse session
const REVERSE_LEG_QUEUE: usize = 64;

struct PendingLeg {
    session_id: String,
    tx: oneshot::Sender<BoxedStream>,
}

/// Where a claimed leg goes
pub enum LegSlot {
    /// A forward relay waiting for exactly this leg
    Requested(oneshot::Sender<BoxedStream>),
    /// A reverse session accepting agent-originated legs
    Unsolicited(mpsc::Sender<BoxedStream>),
}

impl LegSlot {
    /// Hand the stream to the waiting relay
    pub async fn fulfil(self, stream: BoxedStream) -> Result<(), RelayError> {
        match self {
            LegSlot::Requested(tx) => tx
                .send(stream)
                .map_err(|_| RelayError::UnknownLeg("relay stopped waiting".into())),
            LegSlot::Unsolicited(tx) => tx
                .send(stream)
                .await
                .map_err(|_| RelayError::UnknownLeg("reverse session closed".into())),
        }
    }
}

/// Routes agent-opened legs to the relays waiting for them
pub struct LegRouter {
    /// Requested legs indexed by leg id
    pending: DashMap<String, PendingLeg>,
    /// Reverse sessions indexed by session id
    reverse: DashMap<String, mpsc::Sender<BoxedStream>>,
}

impl LegRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            reverse: DashMap::new(),
        }
    }

    /// Register a leg the coordinator is about to ask for
    pub fn expect(&self, session_id: &str, leg_id: &str) -> oneshot::Receiver<BoxedStream> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            leg_id.to_string(),
            PendingLeg {
                session_id: session_id.to_string(),
                tx,
            },
        );
        rx
    }

    /// Stop waiting for a requested leg
    pub fn forget(&self, leg_id: &str) {
        self.pending.remove(leg_id);
    }

    /// Start accepting unsolicited legs for a reverse session
    pub fn listen_reverse(&self, session_id: &str) -> mpsc::Receiver<BoxedStream> {
        let (tx, rx) = mpsc::channel(REVERSE_LEG_QUEUE);
        self.reverse.insert(session_id.to_string(), tx);
        rx
    }

    /// Stop accepting legs for a reverse session
    pub fn close_reverse(&self, session_id: &str) {
        self.reverse.remove(session_id);
    }

    /// Claim the slot an announced leg belongs to
    pub fn claim(&self, session_id: &str, leg_id: Option<&str>) -> Result<LegSlot, RelayError> {
        match leg_id {
            Some(leg_id) => {
                let (_, pending) = self
                    .pending
                    .remove_if(leg_id, |_, p| p.session_id == session_id)
                    .ok_or_else(|| RelayError::UnknownLeg(format!("{}/{}", session_id, leg_id)))?;
                Ok(LegSlot::Requested(pending.tx))
            }
            None => self
                .reverse
                .get(session_id)
                .map(|tx| LegSlot::Unsolicited(tx.clone()))
                .ok_or_else(|| RelayError::UnknownLeg(session_id.to_string())),
        }
    }

    /// Number of requested legs not yet opened
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for LegRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_requested_leg_reaches_waiter() {
        let router = LegRouter::new();
        let rx = router.expect("s1", "l1");

        let (mut agent_end, coordinator_end) = tokio::io::duplex(64);
        let slot = router.claim("s1", Some("l1")).unwrap();
        slot.fulfil(Box::new(coordinator_end)).await.unwrap();

        let mut leg = rx.await.unwrap();
        agent_end.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        leg.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(router.pending_len(), 0);
    }

    #[test]
    fn test_leg_for_wrong_session_rejected() {
        let router = LegRouter::new();
        let _rx = router.expect("s1", "l1");
        assert!(router.claim("s2", Some("l1")).is_err());
        assert!(router.claim("s1", Some("l1")).is_ok());
        assert!(router.claim("s1", Some("l1")).is_err());
    }

    #[tokio::test]
    async fn test_unsolicited_leg_needs_reverse_session() {
        let router = LegRouter::new();
        assert!(router.claim("rev", None).is_err());

        let mut rx = router.listen_reverse("rev");
        let (_agent_end, coordinator_end) = tokio::io::duplex(64);
        router
            .claim("rev", None)
            .unwrap()
            .fulfil(Box::new(coordinator_end))
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());

        router.close_reverse("rev");
        assert!(router.claim("rev", None).is_err());
    }
}
