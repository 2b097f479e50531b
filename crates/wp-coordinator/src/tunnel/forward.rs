//! Forward sessions: local listener, destination on the agent's side

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use wp_core::RelayError;
use wp_protocol::{DatagramCodec, MAX_DATAGRAM_SIZE};

use super::pump::pump;
use super::relay::TunnelRelay;
use super::session::PortFwdSession;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Datagrams buffered per flow while its leg is opening
const FLOW_QUEUE: usize = 256;

/// Consecutive accept/receive errors after which the listener is given up
const MAX_SOCKET_FAILURES: u32 = 32;

/// Run of consecutive socket errors on a session's listener
#[derive(Debug, Default)]
struct FailureStreak(u32);

impl FailureStreak {
    fn reset(&mut self) {
        self.0 = 0;
    }

    /// Count a failure; true once the listener should be given up
    fn fail(&mut self) -> bool {
        self.0 += 1;
        self.0 >= MAX_SOCKET_FAILURES
    }
}

/// Accept local connections until the session is cancelled
pub(super) async fn serve_tcp(
    relay: Arc<TunnelRelay>,
    session: Arc<PortFwdSession>,
    listener: TcpListener,
) {
    let mut failures = FailureStreak::default();
    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures.reset();
                    tracing::debug!(session_id = %session.id, "Accepted connection from {}", peer);
                    let relay = Arc::clone(&relay);
                    let s = Arc::clone(&session);
                    session.spawn_relay(async move {
                        relay_connection(relay, s, stream, peer).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id, "Accept failed: {}", e);
                    if failures.fail() {
                        tracing::error!(session_id = %session.id, "Listener keeps failing, stopping session");
                        relay.spawn_teardown(Arc::clone(&session));
                        break;
                    }
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    tracing::debug!(session_id = %session.id, "Listener closed");
}

async fn relay_connection(
    relay: Arc<TunnelRelay>,
    session: Arc<PortFwdSession>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let leg = match relay.request_leg(&session).await {
        Ok(leg) => leg,
        Err(RelayError::Cancelled(_)) => return,
        Err(e) => {
            tracing::warn!(session_id = %session.id, "No tunnel for {}: {}", peer, e);
            return;
        }
    };

    match pump(stream, leg, session.token(), session.spec.timeout).await {
        Ok(end) => tracing::debug!(session_id = %session.id, "Connection from {} ended: {:?}", peer, end),
        Err(e) => tracing::debug!(session_id = %session.id, "Connection from {} failed: {}", peer, e),
    }
}

/// One local UDP peer and its leg
struct Flow {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

type FlowTable = DashMap<SocketAddr, Flow>;

/// Demultiplex datagrams from the local socket into per-peer flows
pub(super) async fn serve_udp(
    relay: Arc<TunnelRelay>,
    session: Arc<PortFwdSession>,
    socket: UdpSocket,
) {
    let socket = Arc::new(socket);
    let flows: Arc<FlowTable> = Arc::new(DashMap::new());
    let mut next_flow = 0u64;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut failures = FailureStreak::default();

    loop {
        let (n, peer) = tokio::select! {
            _ = session.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => {
                    failures.reset();
                    received
                }
                Err(e) => {
                    // ICMP errors from earlier replies surface here
                    tracing::debug!(session_id = %session.id, "UDP receive failed: {}", e);
                    if failures.fail() {
                        tracing::error!(session_id = %session.id, "UDP socket keeps failing, stopping session");
                        relay.spawn_teardown(Arc::clone(&session));
                        break;
                    }
                    continue;
                }
            },
        };
        let datagram = Bytes::copy_from_slice(&buf[..n]);

        let sent = match flows.get(&peer) {
            Some(flow) => flow.tx.try_send(datagram),
            None => Err(TrySendError::Closed(datagram)),
        };
        let datagram = match sent {
            Ok(()) => continue,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(session_id = %session.id, "Flow queue full, dropping datagram from {}", peer);
                continue;
            }
            Err(TrySendError::Closed(datagram)) => datagram,
        };

        next_flow += 1;
        let (tx, rx) = mpsc::channel(FLOW_QUEUE);
        let _ = tx.try_send(datagram);
        flows.insert(peer, Flow { id: next_flow, tx });
        tracing::debug!(session_id = %session.id, "New UDP flow from {}", peer);

        let flow = FlowContext {
            relay: Arc::clone(&relay),
            session: Arc::clone(&session),
            socket: Arc::clone(&socket),
            flows: Arc::clone(&flows),
            peer,
            id: next_flow,
        };
        session.spawn_relay(flow.run(rx));
    }
    tracing::debug!(session_id = %session.id, "UDP listener closed ({} flows)", flows.len());
}

struct FlowContext {
    relay: Arc<TunnelRelay>,
    session: Arc<PortFwdSession>,
    socket: Arc<UdpSocket>,
    flows: Arc<FlowTable>,
    peer: SocketAddr,
    id: u64,
}

impl FlowContext {
    async fn run(self, rx: mpsc::Receiver<Bytes>) {
        match self.relay.request_leg(&self.session).await {
            Ok(leg) => self.relay_datagrams(leg, rx).await,
            Err(RelayError::Cancelled(_)) => {}
            Err(e) => tracing::warn!(session_id = %self.session.id, "No tunnel for {}: {}", self.peer, e),
        }
        self.flows.remove_if(&self.peer, |_, flow| flow.id == self.id);
    }

    async fn relay_datagrams(&self, leg: wp_core::traits::BoxedStream, mut rx: mpsc::Receiver<Bytes>) {
        let idle = self
            .session
            .spec
            .timeout
            .unwrap_or(self.relay.settings().udp_flow_idle);
        let mut framed = Framed::new(leg, DatagramCodec);
        let idle_timer = tokio::time::sleep(idle);
        tokio::pin!(idle_timer);

        loop {
            tokio::select! {
                _ = self.session.cancelled() => break,
                _ = &mut idle_timer => {
                    tracing::debug!(session_id = %self.session.id, "UDP flow from {} idle", self.peer);
                    break;
                }
                datagram = rx.recv() => match datagram {
                    Some(datagram) => {
                        if let Err(e) = framed.send(datagram).await {
                            tracing::debug!(session_id = %self.session.id, "Tunnel write failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                reply = framed.next() => match reply {
                    Some(Ok(reply)) => {
                        if let Err(e) = self.socket.send_to(&reply, self.peer).await {
                            tracing::debug!(session_id = %self.session.id, "Reply to {} failed: {}", self.peer, e);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %self.session.id, "Tunnel read failed: {}", e);
                        break;
                    }
                    None => break,
                },
            }
            idle_timer.as_mut().reset(Instant::now() + idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_streak_gives_up_after_limit() {
        let mut failures = FailureStreak::default();
        for _ in 1..MAX_SOCKET_FAILURES {
            assert!(!failures.fail());
        }
        assert!(failures.fail());
    }

    #[test]
    fn test_success_resets_streak() {
        let mut failures = FailureStreak::default();
        for _ in 1..MAX_SOCKET_FAILURES {
            failures.fail();
        }
        failures.reset();
        assert!(!failures.fail());
    }
}
