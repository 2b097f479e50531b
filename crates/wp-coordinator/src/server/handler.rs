//! Per-connection handling
//!
//! The first frame decides what a connection is: `Hello` opens a control
//! connection, `LegOpen` turns it into a tunnel leg.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use wp_core::Agent;
use wp_protocol::{read_frame, write_frame, AgentHello, FrameCodec, Message, PROTOCOL_VERSION};

use crate::agents::AgentRegistry;
use crate::broker::CommandBroker;
use crate::connection::AgentConnections;
use crate::tunnel::LegRouter;

/// How long a new connection has to send its first frame
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state connection handlers work against
#[derive(Clone)]
pub struct ServerContext {
    pub connections: Arc<AgentConnections>,
    pub agents: Arc<AgentRegistry>,
    pub broker: Arc<CommandBroker>,
    pub legs: Arc<LegRouter>,
}

/// Handle one agent connection until it closes or `cancel` fires
pub async fn handle_connection(
    ctx: ServerContext,
    mut stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let first = tokio::time::timeout(FIRST_FRAME_TIMEOUT, read_frame(&mut stream))
        .await
        .context("no first frame")?
        .context("bad first frame")?;

    match first {
        Message::Hello(hello) => control_connection(ctx, stream, peer, hello, cancel).await,
        Message::LegOpen { session_id, leg_id } => {
            open_leg(ctx, stream, session_id, leg_id).await
        }
        other => {
            let _ = write_frame(
                &mut stream,
                &Message::Error {
                    message: "expected Hello or LegOpen".into(),
                },
            )
            .await;
            bail!("unexpected first frame from {}: {:?}", peer, other.message_type())
        }
    }
}

async fn control_connection(
    ctx: ServerContext,
    mut stream: TcpStream,
    peer: SocketAddr,
    hello: AgentHello,
    cancel: CancellationToken,
) -> Result<()> {
    if hello.version != PROTOCOL_VERSION {
        let reason = format!(
            "protocol version {} not supported (expected {})",
            hello.version, PROTOCOL_VERSION
        );
        write_frame(
            &mut stream,
            &Message::HelloAck {
                accepted: false,
                reason: Some(reason.clone()),
            },
        )
        .await?;
        bail!("{} rejected: {}", peer, reason);
    }

    let agent = Agent::from_hello(hello, peer.to_string(), "tcp");
    let tag = agent.tag.clone();
    tracing::info!("Agent {} connected from {} ({})", tag, peer, agent.os);

    write_frame(
        &mut stream,
        &Message::HelloAck {
            accepted: true,
            reason: None,
        },
    )
    .await?;

    let mut registration = ctx.connections.register(agent.clone(), &cancel);
    ctx.agents.insert(agent);
    let connection = Arc::clone(&registration.connection);
    let mut framed = Framed::new(stream, FrameCodec::new());

    let result: Result<()> = async {
        loop {
            tokio::select! {
                _ = registration.cancel.cancelled() => break,
                envelope = registration.outbound.recv() => match envelope {
                    Some(envelope) => framed.send(Message::Command(envelope)).await?,
                    None => break,
                },
                frame = framed.next() => match frame {
                    Some(Ok(Message::Reply { id, payload })) => {
                        connection.touch();
                        tracing::debug!(command_id = %id, agent = %tag, "Reply received");
                        ctx.broker.deliver_result(id, payload);
                    }
                    Some(Ok(Message::Heartbeat { timestamp })) => {
                        connection.touch();
                        framed.send(Message::HeartbeatAck { timestamp }).await?;
                    }
                    Some(Ok(Message::Error { message })) => {
                        connection.touch();
                        tracing::warn!(agent = %tag, "Agent reported error: {}", message);
                    }
                    Some(Ok(other)) => {
                        tracing::debug!(agent = %tag, "Ignoring {:?} on control connection", other.message_type());
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }
        Ok(())
    }
    .await;

    if ctx.connections.unregister(&tag, connection.conn_id) {
        ctx.agents.remove(&tag);
        tracing::info!("Agent {} disconnected", tag);
    }
    result
}

async fn open_leg(
    ctx: ServerContext,
    mut stream: TcpStream,
    session_id: String,
    leg_id: Option<String>,
) -> Result<()> {
    match ctx.legs.claim(&session_id, leg_id.as_deref()) {
        Ok(slot) => {
            write_frame(
                &mut stream,
                &Message::LegAck {
                    accepted: true,
                    reason: None,
                },
            )
            .await?;
            tracing::trace!(session_id = %session_id, "Tunnel leg opened");
            slot.fulfil(Box::new(stream)).await?;
            Ok(())
        }
        Err(e) => {
            write_frame(
                &mut stream,
                &Message::LegAck {
                    accepted: false,
                    reason: Some(e.to_string()),
                },
            )
            .await?;
            Err(e.into())
        }
    }
}
