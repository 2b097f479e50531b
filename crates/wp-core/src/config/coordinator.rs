//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Magic string whose hash an interactive module echoes back when ready
pub const DEFAULT_MAGIC_STRING: &str = "waypost-interactive-ready";

/// Configuration for the coordinator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address agents dial into
    pub bind_address: String,

    /// How often `await_result` checks the result table
    #[serde(with = "duration_millis")]
    pub result_poll_interval: Duration,

    /// Results nobody collected are evicted after this long
    #[serde(with = "duration_secs")]
    pub result_ttl: Duration,

    /// How often the result sweeper runs
    #[serde(with = "duration_secs")]
    pub result_sweep_interval: Duration,

    /// Agent connections silent for this long are dropped
    #[serde(with = "duration_secs")]
    pub agent_heartbeat_timeout: Duration,

    /// How often the agent list is refreshed
    #[serde(with = "duration_secs")]
    pub agent_refresh_interval: Duration,

    /// Directories scanned for module manifests
    pub module_dirs: Vec<PathBuf>,

    /// Coordinator workspace; plugin modules are copied under `modules/`
    pub workspace_dir: PathBuf,

    /// Root served to agents for module downloads
    pub www_root: PathBuf,

    /// Directory on the agent where modules are unpacked
    pub agent_root: String,

    /// Port of the agent-side SOCKS5 proxy
    pub agent_socks_port: u16,

    /// Idle timeout for proxy sessions
    #[serde(with = "duration_secs")]
    pub agent_socks_timeout: Duration,

    /// How long to wait for the agent to start its proxy
    #[serde(with = "duration_secs")]
    pub proxy_start_timeout: Duration,

    /// How many times to look for the interactive readiness check
    pub interactive_ready_retries: u32,

    /// Sleep between readiness checks
    #[serde(with = "duration_millis")]
    pub interactive_ready_interval: Duration,

    /// How long a relay waits for the agent to open a tunnel leg
    #[serde(with = "duration_secs")]
    pub leg_timeout: Duration,

    /// UDP flows without traffic for this long are closed
    #[serde(with = "duration_secs")]
    pub udp_flow_idle: Duration,

    /// Shared magic string for the interactive readiness check
    pub magic_string: String,

    /// How long built-in commands wait for an agent reply
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// External program used to attach to interactive modules
    ///
    /// Invoked as `<bridge_command> <agent> <port> <exec_path> [args]`.
    /// Interactive modules are unavailable when unset.
    pub bridge_command: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: "0.0.0.0:7443".to_string(),
            result_poll_interval: Duration::from_millis(100),
            result_ttl: Duration::from_secs(600),
            result_sweep_interval: Duration::from_secs(60),
            agent_heartbeat_timeout: Duration::from_secs(90),
            agent_refresh_interval: Duration::from_secs(10),
            module_dirs: vec![config_dir.join("modules")],
            workspace_dir: config_dir.clone(),
            www_root: config_dir.join("www"),
            agent_root: "/tmp/.waypost".to_string(),
            agent_socks_port: 10800,
            agent_socks_timeout: Duration::from_secs(30),
            proxy_start_timeout: Duration::from_secs(60),
            interactive_ready_retries: 10,
            interactive_ready_interval: Duration::from_millis(1000),
            leg_timeout: Duration::from_secs(30),
            udp_flow_idle: Duration::from_secs(60),
            magic_string: DEFAULT_MAGIC_STRING.to_string(),
            command_timeout: Duration::from_secs(30),
            bridge_command: None,
        }
    }
}
