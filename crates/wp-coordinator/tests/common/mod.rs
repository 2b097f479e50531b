//! Shared fixtures: a recording transport and an in-process agent

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;

use wp_coordinator::tunnel::LegRouter;
use wp_core::traits::{CommandSender, Transport};
use wp_core::{AgentTag, TransportError};
use wp_protocol::{
    parse_cmd, parse_flags, CommandId, DatagramCodec, Envelope, ParsedCommand, VERB_PORT_FWD,
};

/// Transport that records every envelope it is handed
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Envelope>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    /// Parsed payloads of every envelope sent so far
    pub fn commands(&self) -> Vec<ParsedCommand> {
        self.sent()
            .iter()
            .map(|e| parse_flags(&parse_cmd(&e.payload).unwrap()).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Plays the agent side of port forwarding without a network transport.
///
/// `!port_fwd --operation on` commands make it dial the destination and open
/// the requested leg straight into the leg router.
pub struct InProcessAgent {
    legs: Arc<LegRouter>,
    commands: Mutex<Vec<String>>,
}

impl InProcessAgent {
    pub fn new(legs: Arc<LegRouter>) -> Arc<Self> {
        Arc::new(Self {
            legs,
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<ParsedCommand> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| parse_flags(&parse_cmd(c).unwrap()).unwrap())
            .collect()
    }

    /// Commands with this verb
    pub fn verbs(&self, verb: &str) -> Vec<ParsedCommand> {
        self.commands()
            .into_iter()
            .filter(|c| c.verb == verb)
            .collect()
    }

    /// Commands with this `--operation`
    pub fn operations(&self, operation: &str) -> Vec<ParsedCommand> {
        self.commands()
            .into_iter()
            .filter(|c| c.get("operation") == Some(operation))
            .collect()
    }

    /// Open an unsolicited leg for a reverse session, as if a client had
    /// connected to the agent-side listener
    pub async fn open_reverse_leg(&self, session_id: &str) -> tokio::io::DuplexStream {
        let (agent_end, coordinator_end) = tokio::io::duplex(64 * 1024);
        self.legs
            .claim(session_id, None)
            .unwrap()
            .fulfil(Box::new(coordinator_end))
            .await
            .unwrap();
        agent_end
    }

    fn open_leg(&self, cmd: &ParsedCommand) {
        let (Some(session), Some(leg), Some(to)) = (cmd.get("shID"), cmd.get("connID"), cmd.get("to"))
        else {
            return;
        };
        let Ok(slot) = self.legs.claim(session, Some(leg)) else {
            return;
        };
        let udp = cmd.get("protocol") == Some("udp");
        let to = to.to_string();

        tokio::spawn(async move {
            let (agent_end, coordinator_end) = tokio::io::duplex(64 * 1024);
            if slot.fulfil(Box::new(coordinator_end)).await.is_err() {
                return;
            }
            if udp {
                relay_udp(agent_end, &to).await;
            } else if let Ok(mut dest) = TcpStream::connect(&to).await {
                let mut agent_end = agent_end;
                let _ = tokio::io::copy_bidirectional(&mut agent_end, &mut dest).await;
            }
        });
    }
}

async fn relay_udp(leg: tokio::io::DuplexStream, to: &str) {
    let Ok(socket) = UdpSocket::bind("127.0.0.1:0").await else {
        return;
    };
    if socket.connect(to).await.is_err() {
        return;
    }
    let mut framed = Framed::new(leg, DatagramCodec);
    let mut buf = vec![0u8; 65535];
    loop {
        tokio::select! {
            datagram = framed.next() => match datagram {
                Some(Ok(datagram)) => {
                    let _ = socket.send(&datagram).await;
                }
                _ => break,
            },
            received = socket.recv(&mut buf) => match received {
                Ok(n) => {
                    if framed.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
}

#[async_trait]
impl CommandSender for InProcessAgent {
    async fn send_command(
        &self,
        payload: &str,
        _id: &CommandId,
        _target: &AgentTag,
    ) -> Result<(), TransportError> {
        self.commands.lock().unwrap().push(payload.to_string());
        let cmd = parse_flags(&parse_cmd(payload).unwrap()).unwrap();
        if cmd.verb == VERB_PORT_FWD && cmd.get("operation") == Some("on") {
            self.open_leg(&cmd);
        }
        Ok(())
    }
}

/// TCP echo server on an ephemeral loopback port
pub async fn tcp_echo_server() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// UDP echo server on an ephemeral loopback port
pub async fn udp_echo_server() -> std::net::SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });
    addr
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
