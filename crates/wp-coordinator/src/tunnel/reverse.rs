//! Reverse sessions: agent-side listener, destination on the coordinator's side

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use wp_core::traits::BoxedStream;
use wp_core::Protocol;
use wp_protocol::{DatagramCodec, MAX_DATAGRAM_SIZE};

use super::pump::pump;
use super::relay::TunnelRelay;
use super::session::PortFwdSession;

/// Bridge every leg the agent opens for this session to the local destination
pub(super) async fn serve(
    relay: Arc<TunnelRelay>,
    session: Arc<PortFwdSession>,
    mut legs: mpsc::Receiver<BoxedStream>,
) {
    loop {
        let leg = tokio::select! {
            _ = session.cancelled() => break,
            leg = legs.recv() => match leg {
                Some(leg) => leg,
                None => break,
            },
        };

        tracing::debug!(session_id = %session.id, "Agent opened reverse leg");
        let relay = Arc::clone(&relay);
        let s = Arc::clone(&session);
        session.spawn_relay(async move {
            let result = match s.spec.protocol {
                Protocol::Tcp => bridge_tcp(&s, leg).await,
                Protocol::Udp => bridge_udp(&relay, &s, leg).await,
            };
            if let Err(e) = result {
                tracing::warn!(session_id = %s.id, "Reverse leg to {} failed: {}", s.spec.to, e);
            }
        });
    }
    tracing::debug!(session_id = %session.id, "Reverse session stopped accepting legs");
}

async fn bridge_tcp(session: &PortFwdSession, leg: BoxedStream) -> std::io::Result<()> {
    let stream = tokio::select! {
        _ = session.cancelled() => return Ok(()),
        stream = TcpStream::connect(&session.spec.to) => stream?,
    };
    let end = pump(leg, stream, session.token(), session.spec.timeout).await?;
    tracing::debug!(session_id = %session.id, "Reverse connection ended: {:?}", end);
    Ok(())
}

async fn resolve(to: &str) -> std::io::Result<SocketAddr> {
    tokio::net::lookup_host(to).await?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("cannot resolve {}", to))
    })
}

async fn bridge_udp(
    relay: &TunnelRelay,
    session: &PortFwdSession,
    leg: BoxedStream,
) -> std::io::Result<()> {
    let dest = resolve(&session.spec.to).await?;
    let local: SocketAddr = if dest.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(dest).await?;

    let idle = session.spec.timeout.unwrap_or(relay.settings().udp_flow_idle);
    let mut framed = Framed::new(leg, DatagramCodec);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let idle_timer = tokio::time::sleep(idle);
    tokio::pin!(idle_timer);

    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            _ = &mut idle_timer => {
                tracing::debug!(session_id = %session.id, "Reverse UDP flow idle");
                break;
            }
            datagram = framed.next() => match datagram {
                Some(Ok(datagram)) => {
                    socket.send(&datagram).await?;
                }
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session.id, "Tunnel read failed: {}", e);
                    break;
                }
                None => break,
            },
            received = socket.recv(&mut buf) => {
                let n = received?;
                if let Err(e) = framed.send(bytes::Bytes::copy_from_slice(&buf[..n])).await {
                    tracing::debug!(session_id = %session.id, "Tunnel write failed: {}", e);
                    break;
                }
            }
        }
        idle_timer.as_mut().reset(Instant::now() + idle);
    }
    Ok(())
}
