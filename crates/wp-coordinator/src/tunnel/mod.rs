//! Port-forward tunnel relay
//!
//! Sessions relay TCP connections or UDP flows between local sockets and an
//! agent. Each relayed connection or flow rides its own leg, a byte stream
//! the agent opens back to the coordinator.

mod forward;
mod legs;
mod proxy;
mod pump;
mod registry;
mod relay;
mod reverse;
mod session;

pub use legs::{LegRouter, LegSlot};
pub use proxy::{start_proxy, stop_proxy, ProxySpec};
pub use pump::{pump, PumpEnd};
pub use registry::SessionRegistry;
pub use relay::{RelaySettings, TunnelRelay};
pub use session::{
    normalize_bind_addr, PortFwdSession, SessionInfo, SessionKind, SessionSpec, DEFAULT_BIND_ADDR,
};
