//! Coordinator state
//!
//! Owns every shared structure and the background tasks that maintain
//! them. Nothing in the coordinator is a process-wide global.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wp_core::config::CoordinatorConfig;
use wp_core::traits::{AgentSource, InteractiveBridge};

use crate::agents::{run_agent_refresher, AgentRegistry};
use crate::broker::{run_result_sweeper, CommandBroker};
use crate::connection::{AgentConnections, HealthMonitor};
use crate::modules::{EngineDeps, EngineSettings, ModuleCatalogue, ModuleEngine};
use crate::server::ServerContext;
use crate::tunnel::{LegRouter, RelaySettings, TunnelRelay};

/// State for the coordinator daemon
pub struct CoordinatorState {
    /// Configuration
    pub config: CoordinatorConfig,
    /// Live agent connections (the transport)
    pub connections: Arc<AgentConnections>,
    /// Agent directory and active selection
    pub agents: Arc<AgentRegistry>,
    /// Command/result correlation
    pub broker: Arc<CommandBroker>,
    /// Routes agent-opened legs to relays
    pub legs: Arc<LegRouter>,
    /// Port-forward sessions
    pub relay: Arc<TunnelRelay>,
    /// Module selection and dispatch
    pub engine: Arc<ModuleEngine>,
    /// Root of every cancellation scope
    cancel: CancellationToken,
    /// Background maintenance tasks
    tasks: TaskTracker,
}

impl CoordinatorState {
    /// Wire up the coordinator
    pub fn new(
        config: CoordinatorConfig,
        catalogue: ModuleCatalogue,
        bridge: Option<Arc<dyn InteractiveBridge>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let connections = Arc::new(AgentConnections::new());
        let agents = Arc::new(AgentRegistry::new());
        let broker = Arc::new(CommandBroker::new(
            Arc::clone(&connections) as _,
            config.result_poll_interval,
        ));
        let legs = Arc::new(LegRouter::new());
        let relay = Arc::new(TunnelRelay::new(
            Arc::clone(&broker) as _,
            Arc::clone(&legs),
            RelaySettings::from_config(&config),
            cancel.child_token(),
        ));
        let deps = Arc::new(EngineDeps {
            catalogue: Arc::new(catalogue),
            agents: Arc::clone(&agents),
            broker: Arc::clone(&broker),
            relay: Arc::clone(&relay),
            bridge,
            settings: EngineSettings::from_config(&config),
        });
        let engine = Arc::new(ModuleEngine::new(deps, cancel.child_token()));

        Self {
            config,
            connections,
            agents,
            broker,
            legs,
            relay,
            engine,
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// Context for agent connection handlers
    pub fn server_context(&self) -> ServerContext {
        ServerContext {
            connections: Arc::clone(&self.connections),
            agents: Arc::clone(&self.agents),
            broker: Arc::clone(&self.broker),
            legs: Arc::clone(&self.legs),
        }
    }

    /// Token cancelled on shutdown
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the agent refresher, result sweeper and health monitor
    pub fn start_background_tasks(&self) {
        let config = &self.config;

        self.tasks.spawn(run_agent_refresher(
            Arc::clone(&self.agents),
            Arc::clone(&self.connections) as Arc<dyn AgentSource>,
            config.agent_refresh_interval,
            self.cancel.child_token(),
        ));

        self.tasks.spawn(run_result_sweeper(
            Arc::clone(&self.broker),
            config.result_ttl,
            config.result_sweep_interval,
            self.cancel.child_token(),
        ));

        let monitor = HealthMonitor::new(
            config.agent_refresh_interval,
            config.agent_heartbeat_timeout,
        );
        self.tasks.spawn(
            monitor.run(Arc::clone(&self.connections), self.cancel.child_token()),
        );
    }

    /// Stop everything: running modules, port forwards, then background
    /// tasks. Returns once every task has finished.
    pub async fn shutdown(&self) {
        tracing::info!("Coordinator shutting down");
        self.engine.shutdown().await;
        self.relay.shutdown().await;
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Coordinator stopped");
    }
}
