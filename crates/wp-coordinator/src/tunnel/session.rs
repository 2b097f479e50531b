//! Port-forward sessions

use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;

use wp_core::time::current_time_millis;
use wp_core::{AgentTag, Direction, Protocol};

/// Default local bind address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";

/// What created a session, which decides the remote stop command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Created by the `port_fwd` module
    PortFwd,
    /// Half of a proxy pair
    Proxy,
}

/// Everything needed to start a port-forward session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// What created the session
    pub kind: SessionKind,
    /// TCP or UDP
    pub protocol: Protocol,
    /// Forward or reverse
    pub direction: Direction,
    /// Listener bind address (local for forward, agent-side for reverse)
    pub bind_addr: String,
    /// Listener port
    pub listen_port: String,
    /// Destination (agent-side for forward, local for reverse)
    pub to: String,
    /// Agent carrying the tunnel
    pub agent: AgentTag,
    /// Human-readable description
    pub description: String,
    /// Idle timeout for relayed connections and flows
    pub timeout: Option<Duration>,
}

impl SessionSpec {
    /// A forward session: local `listen_port` to `to` on the agent's side
    pub fn forward(agent: AgentTag, to: impl Into<String>, listen_port: impl Into<String>) -> Self {
        Self::new(Direction::Forward, agent, to.into(), listen_port.into())
    }

    /// A reverse session: agent-side `listen_port` to local `to`
    pub fn reverse(agent: AgentTag, to: impl Into<String>, listen_port: impl Into<String>) -> Self {
        Self::new(Direction::Reverse, agent, to.into(), listen_port.into())
    }

    fn new(direction: Direction, agent: AgentTag, to: String, listen_port: String) -> Self {
        Self {
            kind: SessionKind::PortFwd,
            protocol: Protocol::Tcp,
            direction,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            listen_port,
            to,
            agent,
            description: String::new(),
            timeout: None,
        }
    }

    /// Set the protocol
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the bind address; empty and `localhost` mean `127.0.0.1`
    pub fn with_bind_addr(mut self, bind_addr: &str) -> Self {
        self.bind_addr = normalize_bind_addr(bind_addr);
        self
    }

    /// Set the idle timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the kind
    pub fn with_kind(mut self, kind: SessionKind) -> Self {
        self.kind = kind;
        self
    }

    /// `bind_addr:listen_port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.listen_port)
    }

    fn default_description(&self) -> String {
        match self.direction {
            Direction::Forward => format!(
                "{} {} (local) -> {} (agent {})",
                self.protocol,
                self.listen_addr(),
                self.to,
                self.agent
            ),
            Direction::Reverse => format!(
                "{} {} (agent {}) -> {} (local)",
                self.protocol,
                self.listen_addr(),
                self.agent,
                self.to
            ),
        }
    }
}

/// Normalize a user-supplied bind address
pub fn normalize_bind_addr(addr: &str) -> String {
    match addr.trim() {
        "" | "localhost" => DEFAULT_BIND_ADDR.to_string(),
        other => other.to_string(),
    }
}

/// Snapshot of a session for listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub kind: SessionKind,
    pub protocol: Protocol,
    pub direction: Direction,
    pub bind_addr: String,
    pub listen_port: String,
    pub to: String,
    pub agent: String,
    pub description: String,
    pub created_at: u64,
}

/// A live port-forward session
///
/// Owns the cancellation scope of its listener and of every connection or
/// flow it relays.
pub struct PortFwdSession {
    /// Session id
    pub id: String,
    /// What the session relays
    pub spec: SessionSpec,
    /// Creation time (ms since epoch)
    pub created_at: u64,
    /// Bound local address, for forward sessions
    local_addr: Option<SocketAddr>,
    /// Cancels the listener and all relays of this session
    cancel: CancellationToken,
    /// Set once by whoever tears the session down
    closed: AtomicBool,
    /// In-flight relays
    relays: TaskTracker,
}

impl PortFwdSession {
    pub(crate) fn new(
        mut spec: SessionSpec,
        local_addr: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> Self {
        if spec.description.is_empty() {
            spec.description = spec.default_description();
        }
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            spec,
            created_at: current_time_millis(),
            local_addr,
            cancel,
            closed: AtomicBool::new(false),
            relays: TaskTracker::new(),
        }
    }

    /// Address the local listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether teardown has started
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Claim the right to tear this session down. Only the first caller wins.
    pub(crate) fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Completes when the session is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a relay task in this session's scope
    pub(crate) fn spawn_relay<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.relays.spawn(task);
    }

    /// Wait for every relay of this session to finish
    pub(crate) async fn join_relays(&self) {
        self.relays.close();
        self.relays.wait().await;
    }

    /// Whether this session is the one an ad-hoc "off" names
    pub fn matches(&self, to: &str, listen_port: &str, protocol: Protocol) -> bool {
        self.spec.to == to && self.spec.listen_port == listen_port && self.spec.protocol == protocol
    }

    /// Listing snapshot
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            kind: self.spec.kind,
            protocol: self.spec.protocol,
            direction: self.spec.direction,
            bind_addr: self.spec.bind_addr.clone(),
            listen_port: self.spec.listen_port.clone(),
            to: self.spec.to.clone(),
            agent: self.spec.agent.to_string(),
            description: self.spec.description.clone(),
            created_at: self.created_at,
        }
    }
}
