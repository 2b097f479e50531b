//! Agent-side SOCKS proxy exposed through a TCP + UDP session pair

use std::sync::Arc;
use std::time::Duration;

use wp_core::{AgentTag, ModuleError, Protocol};
use wp_protocol::{CommandId, CommandLine, VERB_PROXY};

use crate::broker::CommandBroker;

use super::relay::TunnelRelay;
use super::session::{normalize_bind_addr, PortFwdSession, SessionKind, SessionSpec};

/// Local end of an agent proxy
#[derive(Debug, Clone)]
pub struct ProxySpec {
    /// Agent running the proxy
    pub agent: AgentTag,
    /// Local bind address
    pub bind_addr: String,
    /// Local port (shared by the TCP and UDP sessions)
    pub port: String,
    /// Port of the SOCKS server on the agent
    pub socks_port: u16,
    /// Idle timeout for proxied connections
    pub timeout: Duration,
}

impl ProxySpec {
    /// Create a proxy spec; `localhost` binds to `127.0.0.1`
    pub fn new(
        agent: AgentTag,
        bind_addr: &str,
        port: impl Into<String>,
        socks_port: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            agent,
            bind_addr: normalize_bind_addr(bind_addr),
            port: port.into(),
            socks_port,
            timeout,
        }
    }

    /// SOCKS server address as seen from the agent
    pub fn socks_addr(&self) -> String {
        format!("127.0.0.1:{}", self.socks_port)
    }

    /// Description the session for `protocol` is registered (and found) under
    pub fn description(&self, protocol: Protocol) -> String {
        let label = match protocol {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        };
        format!(
            "Agent proxy ({}): {}:{} (local) -> {} (agent)",
            label,
            self.bind_addr,
            self.port,
            self.socks_addr()
        )
    }

    fn session(&self, protocol: Protocol) -> SessionSpec {
        SessionSpec::forward(self.agent.clone(), self.socks_addr(), self.port.clone())
            .with_kind(SessionKind::Proxy)
            .with_protocol(protocol)
            .with_bind_addr(&self.bind_addr)
            .with_timeout(Some(self.timeout))
            .with_description(self.description(protocol))
    }
}

/// Start the agent's SOCKS server and expose it locally over TCP and UDP.
///
/// The UDP session is only started once the TCP session is registered. If
/// it fails, the TCP session is torn down again.
pub async fn start_proxy(
    relay: &Arc<TunnelRelay>,
    broker: &CommandBroker,
    proxy: &ProxySpec,
    start_timeout: Duration,
) -> Result<(Arc<PortFwdSession>, Arc<PortFwdSession>), ModuleError> {
    let cmd = CommandLine::new(VERB_PROXY)
        .opt("mode", "on")
        .opt("addr", format!("0.0.0.0:{}", proxy.socks_port))
        .build();
    let id = CommandId::generate();
    broker.send(&cmd, &id, &proxy.agent).await?;

    if broker.await_result(&id, start_timeout).await.is_none() {
        return Err(ModuleError::Timeout(format!(
            "agent {} did not start its SOCKS5 proxy",
            proxy.agent
        )));
    }
    tracing::info!(agent = %proxy.agent, "Agent started SOCKS5 proxy");

    let tcp = relay.run_port_fwd(proxy.session(Protocol::Tcp)).await?;
    match relay.run_port_fwd(proxy.session(Protocol::Udp)).await {
        Ok(udp) => Ok((tcp, udp)),
        Err(e) => {
            relay.teardown(&tcp).await;
            Err(e.into())
        }
    }
}

/// Tear down both sessions of a proxy. Returns how many were stopped.
pub async fn stop_proxy(relay: &TunnelRelay, proxy: &ProxySpec) -> usize {
    let tcp = proxy.description(Protocol::Tcp);
    let udp = proxy.description(Protocol::Udp);
    relay.stop_by_description(&[&tcp, &udp]).await
}
