//! waypost coordinator daemon
//!
//! Accepts agent connections, correlates command results, dispatches
//! modules and relays port forwards.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wp_core::config::{self, CoordinatorConfig};
use wp_core::traits::InteractiveBridge;
use wp_coordinator::bridge::ProcessBridge;
use wp_coordinator::console::Console;
use wp_coordinator::modules::ModuleCatalogue;
use wp_coordinator::server::AgentServer;
use wp_coordinator::CoordinatorState;

#[derive(Parser)]
#[command(name = "wp-coordinator")]
#[command(about = "waypost coordinator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for agents (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Do not read operator commands from stdin
    #[arg(long)]
    headless: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("waypost coordinator starting...");

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                CoordinatorConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            CoordinatorConfig::default()
        }
    };

    let bind_addr = args.bind.unwrap_or_else(|| config.bind_address.clone());

    std::fs::create_dir_all(&config.www_root)
        .with_context(|| format!("Failed to create web root {:?}", config.www_root))?;
    let catalogue = ModuleCatalogue::load(&config.module_dirs, &config.workspace_dir);

    let bridge = config.bridge_command.as_ref().map(|program| {
        tracing::info!("Interactive modules attach through {}", program);
        Arc::new(ProcessBridge::new(program.clone())) as Arc<dyn InteractiveBridge>
    });
    if bridge.is_none() {
        tracing::warn!("No bridge_command configured - interactive modules are disabled");
    }

    let state = Arc::new(CoordinatorState::new(config, catalogue, bridge));
    state.start_background_tasks();

    // Cancelled by a signal or the console; the coordinator then shuts down
    // while agent connections are still up to receive stop commands
    let stop = CancellationToken::new();

    // Setup signal handlers
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        stop_signal.cancel();
    });

    if !args.headless {
        let console = Console::new(Arc::clone(&state));
        let stop_console = stop.clone();
        tokio::spawn(async move {
            console.run(stop_console.clone()).await;
            stop_console.cancel();
        });
    }

    let server = AgentServer::new(state.server_context(), state.cancel_token());
    tracing::info!("Starting agent server on {}", bind_addr);
    let result = tokio::select! {
        result = server.run(&bind_addr) => result,
        _ = stop.cancelled() => Ok(()),
    };

    state.shutdown().await;
    server.join().await;

    tracing::info!("Coordinator shutdown complete");
    result
}
