//! Tunnel relay: owns port-forward sessions and their lifecycle

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wp_core::config::CoordinatorConfig;
use wp_core::traits::{BoxedStream, CommandSender};
use wp_core::{Direction, Protocol, RelayError};
use wp_protocol::{CommandId, CommandLine, VERB_DELETE_PORT_FWD, VERB_PORT_FWD};

use super::legs::LegRouter;
use super::registry::SessionRegistry;
use super::session::{PortFwdSession, SessionInfo, SessionKind, SessionSpec};
use super::{forward, reverse};

/// Relay timing knobs
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// How long to wait for the agent to open a requested leg
    pub leg_timeout: Duration,
    /// Idle timeout for UDP flows of sessions without their own timeout
    pub udp_flow_idle: Duration,
}

impl RelaySettings {
    /// Take the relay settings from the coordinator config
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            leg_timeout: config.leg_timeout,
            udp_flow_idle: config.udp_flow_idle,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

/// Manages port-forward sessions between local sockets and agents
///
/// Every session runs in a child scope of the relay's shutdown token. The
/// relay never builds a transport of its own; coordination commands go
/// through the injected [`CommandSender`].
pub struct TunnelRelay {
    sessions: SessionRegistry,
    legs: Arc<LegRouter>,
    sender: Arc<dyn CommandSender>,
    settings: RelaySettings,
    /// Background work not owned by a single session
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TunnelRelay {
    /// Create a relay
    pub fn new(
        sender: Arc<dyn CommandSender>,
        legs: Arc<LegRouter>,
        settings: RelaySettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            legs,
            sender,
            settings,
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Live sessions
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Router that agent-opened legs are handed to
    pub fn legs(&self) -> &Arc<LegRouter> {
        &self.legs
    }

    pub(crate) fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub(crate) fn sender(&self) -> &Arc<dyn CommandSender> {
        &self.sender
    }

    /// Start a forward session.
    ///
    /// The local listener is bound before returning, so a bind failure is
    /// reported to the caller. Serving happens in the background.
    pub async fn run_port_fwd(
        self: &Arc<Self>,
        spec: SessionSpec,
    ) -> Result<Arc<PortFwdSession>, RelayError> {
        if spec.direction != Direction::Forward {
            return Err(RelayError::InvalidOption(
                "run_port_fwd needs a forward session".into(),
            ));
        }
        if self.shutdown.is_cancelled() {
            return Err(RelayError::Cancelled("relay".into()));
        }

        let addr = spec.listen_addr();
        let bind_err = |source| RelayError::Bind {
            addr: addr.clone(),
            source,
        };

        let session = match spec.protocol {
            Protocol::Tcp => {
                let listener = TcpListener::bind(&addr).await.map_err(bind_err)?;
                let local = listener.local_addr()?;
                let session = self.register(spec, Some(local));
                let relay = Arc::clone(self);
                let s = Arc::clone(&session);
                session.spawn_relay(forward::serve_tcp(relay, s, listener));
                session
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(&addr).await.map_err(bind_err)?;
                let local = socket.local_addr()?;
                let session = self.register(spec, Some(local));
                let relay = Arc::clone(self);
                let s = Arc::clone(&session);
                session.spawn_relay(forward::serve_udp(relay, s, socket));
                session
            }
        };

        tracing::info!(
            session_id = %session.id,
            agent = %session.spec.agent,
            "Port forward started: {}",
            session.spec.description
        );
        Ok(session)
    }

    /// Start a reverse session.
    ///
    /// Asks the agent to listen on `bind_addr:listen_port`; every connection
    /// it accepts comes back as a leg and is bridged to the local `to`.
    pub async fn init_reversed_port_fwd(
        self: &Arc<Self>,
        spec: SessionSpec,
    ) -> Result<Arc<PortFwdSession>, RelayError> {
        if spec.direction != Direction::Reverse {
            return Err(RelayError::InvalidOption(
                "init_reversed_port_fwd needs a reverse session".into(),
            ));
        }
        if self.shutdown.is_cancelled() {
            return Err(RelayError::Cancelled("relay".into()));
        }

        let session = self.register(spec, None);
        let legs = self.legs.listen_reverse(&session.id);

        let cmd = CommandLine::new(VERB_PORT_FWD)
            .opt("shID", &session.id)
            .opt("bind_addr", &session.spec.bind_addr)
            .opt("listen_port", &session.spec.listen_port)
            .opt("protocol", session.spec.protocol.to_string())
            .opt("operation", "reverse")
            .build();

        if let Err(e) = self
            .sender
            .send_command(&cmd, &CommandId::generate(), &session.spec.agent)
            .await
        {
            self.legs.close_reverse(&session.id);
            self.sessions.remove(&session.id);
            session.token().cancel();
            return Err(e.into());
        }

        let relay = Arc::clone(self);
        let s = Arc::clone(&session);
        session.spawn_relay(reverse::serve(relay, s, legs));

        tracing::info!(
            session_id = %session.id,
            agent = %session.spec.agent,
            "Reverse port forward started: {}",
            session.spec.description
        );
        Ok(session)
    }

    fn register(
        &self,
        spec: SessionSpec,
        local: Option<std::net::SocketAddr>,
    ) -> Arc<PortFwdSession> {
        let session = Arc::new(PortFwdSession::new(
            spec,
            local,
            self.shutdown.child_token(),
        ));
        self.sessions.insert(Arc::clone(&session));
        session
    }

    /// Ask the agent for a new leg of a forward session and wait for it
    pub(crate) async fn request_leg(
        &self,
        session: &PortFwdSession,
    ) -> Result<BoxedStream, RelayError> {
        let leg_id = uuid::Uuid::new_v4().to_string();
        let opened = self.legs.expect(&session.id, &leg_id);

        let cmd = CommandLine::new(VERB_PORT_FWD)
            .opt("to", &session.spec.to)
            .opt("shID", &session.id)
            .opt("connID", &leg_id)
            .opt("protocol", session.spec.protocol.to_string())
            .opt("operation", "on")
            .build();

        if let Err(e) = self
            .sender
            .send_command(&cmd, &CommandId::generate(), &session.spec.agent)
            .await
        {
            self.legs.forget(&leg_id);
            return Err(e.into());
        }

        let result = tokio::select! {
            _ = session.cancelled() => Err(RelayError::Cancelled(session.id.clone())),
            opened = tokio::time::timeout(self.settings.leg_timeout, opened) => match opened {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(_)) => Err(RelayError::UnknownLeg(leg_id.clone())),
                Err(_) => Err(RelayError::LegTimeout(leg_id.clone())),
            },
        };

        if result.is_err() {
            self.legs.forget(&leg_id);
        }
        result
    }

    /// Tear a session down.
    ///
    /// Stops the listener, closes every relayed connection, tells the agent
    /// to release its side and drops the session from the registry. Returns
    /// `false` without doing anything if teardown already started.
    pub async fn teardown(&self, session: &Arc<PortFwdSession>) -> bool {
        if !session.try_close() {
            tracing::debug!(session_id = %session.id, "Session already closed");
            return false;
        }

        session.token().cancel();
        if session.spec.direction == Direction::Reverse {
            self.legs.close_reverse(&session.id);
        }
        session.join_relays().await;

        let cmd = match session.spec.kind {
            SessionKind::PortFwd => CommandLine::new(VERB_PORT_FWD)
                .opt("shID", &session.id)
                .opt("operation", "stop")
                .build(),
            SessionKind::Proxy => CommandLine::new(VERB_DELETE_PORT_FWD)
                .opt("id", &session.id)
                .build(),
        };
        if let Err(e) = self
            .sender
            .send_command(&cmd, &CommandId::generate(), &session.spec.agent)
            .await
        {
            tracing::warn!(session_id = %session.id, "Failed to send stop command: {}", e);
        }

        self.sessions.remove(&session.id);
        tracing::info!(session_id = %session.id, "Port forward stopped: {}", session.spec.description);
        true
    }

    /// Tear a session down in the background, e.g. after its listener died
    pub(crate) fn spawn_teardown(self: &Arc<Self>, session: Arc<PortFwdSession>) {
        let relay = Arc::clone(self);
        self.tracker.spawn(async move {
            relay.teardown(&session).await;
        });
    }

    /// Stop a session by id
    pub async fn stop_session(&self, id: &str) -> Result<bool, RelayError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        Ok(self.teardown(&session).await)
    }

    /// Stop every session with exactly this (destination, listen port,
    /// protocol) key. Returns how many were stopped.
    pub async fn stop_matching(
        &self,
        to: &str,
        listen_port: &str,
        protocol: Protocol,
    ) -> Result<usize, RelayError> {
        let matching = self.sessions.find_matching(to, listen_port, protocol);
        if matching.is_empty() {
            return Err(RelayError::NoMatchingSession {
                to: to.to_string(),
                listen_port: listen_port.to_string(),
            });
        }

        let mut stopped = 0;
        for session in &matching {
            if self.teardown(session).await {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Stop every session whose description is one of `descriptions`
    pub async fn stop_by_description(&self, descriptions: &[&str]) -> usize {
        let mut stopped = 0;
        for session in self.sessions.find_by_description(descriptions) {
            if self.teardown(&session).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Snapshot of all sessions
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list().iter().map(|s| s.info()).collect()
    }

    /// Tear down every session and wait for all relay work to finish
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down tunnel relay ({} sessions)", self.sessions.len());
        for session in self.sessions.list() {
            self.teardown(&session).await;
        }
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use wp_core::{AgentTag, TransportError};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandSender for Recorder {
        async fn send_command(
            &self,
            payload: &str,
            _id: &CommandId,
            _target: &AgentTag,
        ) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_background_teardown_stops_session() {
        let recorder = Arc::new(Recorder::default());
        let relay = Arc::new(TunnelRelay::new(
            recorder.clone(),
            Arc::new(LegRouter::new()),
            RelaySettings::default(),
            CancellationToken::new(),
        ));
        let spec = SessionSpec::forward(AgentTag::new("agent-1"), "10.0.0.5:22", "0")
            .with_bind_addr("127.0.0.1");
        let session = relay.run_port_fwd(spec).await.unwrap();

        relay.spawn_teardown(Arc::clone(&session));
        relay.tracker.close();
        relay.tracker.wait().await;

        assert!(session.is_closed());
        assert!(relay.sessions().is_empty());
        {
            let sent = recorder.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].starts_with(VERB_PORT_FWD));
            assert!(sent[0].contains("--operation stop"));
        }

        // Already torn down; shutdown has nothing left to stop
        relay.shutdown().await;
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }
}
