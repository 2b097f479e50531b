//! Module execution engine
//!
//! Selecting a module loads its option defaults; `run` checks the target
//! and hands the dispatch pipeline to a tracked task:
//!
//! 1. build on the coordinator (if the module has a build step)
//! 2. stop for local plugins
//! 3. stage the payload (single gzip'd file, or a cached module archive)
//! 4. send the start command
//! 5. for interactive modules, wait for the readiness check and bridge in

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wp_core::config::CoordinatorConfig;
use wp_core::traits::{BridgeRequest, InteractiveBridge};
use wp_core::{Agent, ModuleError};
use wp_protocol::{CommandId, CommandLine, VERB_CUSTOM_MODULE};

use crate::agents::AgentRegistry;
use crate::broker::CommandBroker;
use crate::tunnel::TunnelRelay;

use super::builder::build_module;
use super::catalogue::ModuleCatalogue;
use super::manifest::{ModuleManifest, OptionSpec};
use super::options::{OptionSet, DOWNLOAD_ADDR, INTERACTIVE_ARGS};
use super::packaging::{sha256_hex, stage_archive, stage_in_memory, StagedPayload};
use super::runnable::RunnableModule;
use super::builtin;

/// Interactive bridges listen on a random port in this range
const BRIDGE_PORTS: std::ops::Range<u16> = 1024..65535;

/// Engine timing and paths
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub www_root: PathBuf,
    pub agent_root: String,
    pub magic_string: String,
    pub ready_retries: u32,
    pub ready_interval: Duration,
    pub command_timeout: Duration,
    pub proxy_start_timeout: Duration,
    pub socks_port: u16,
    pub socks_timeout: Duration,
}

impl EngineSettings {
    /// Take the engine settings from the coordinator config
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            www_root: config.www_root.clone(),
            agent_root: config.agent_root.clone(),
            magic_string: config.magic_string.clone(),
            ready_retries: config.interactive_ready_retries,
            ready_interval: config.interactive_ready_interval,
            command_timeout: config.command_timeout,
            proxy_start_timeout: config.proxy_start_timeout,
            socks_port: config.agent_socks_port,
            socks_timeout: config.agent_socks_timeout,
        }
    }
}

/// Everything the engine talks to
pub struct EngineDeps {
    pub catalogue: Arc<ModuleCatalogue>,
    pub agents: Arc<AgentRegistry>,
    pub broker: Arc<CommandBroker>,
    pub relay: Arc<TunnelRelay>,
    /// Client for interactive modules; they cannot run without one
    pub bridge: Option<Arc<dyn InteractiveBridge>>,
    pub settings: EngineSettings,
}

/// Where the engine is in the select/configure/dispatch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Selected,
    Configured,
    Dispatched,
    Completed,
    Failed,
}

struct ActiveModule {
    module: RunnableModule,
    options: OptionSet,
}

/// A dispatch, frozen at the moment `run` was called
struct Job {
    module: RunnableModule,
    options: OptionSet,
    target: Option<Arc<Agent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Selects, configures and dispatches modules
pub struct ModuleEngine {
    deps: Arc<EngineDeps>,
    active: Mutex<Option<ActiveModule>>,
    state: Arc<watch::Sender<EngineState>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl ModuleEngine {
    /// Create an engine
    pub fn new(deps: Arc<EngineDeps>, shutdown: CancellationToken) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            deps,
            active: Mutex::new(None),
            state: Arc::new(state),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn deps(&self) -> &Arc<EngineDeps> {
        &self.deps
    }

    /// Make `name` the active module with its default options.
    ///
    /// Modules that agents download get a `download_addr` option so the
    /// payload can come from somewhere other than this coordinator.
    /// Interactive modules always get an `args` option for the bridge.
    pub fn set_active_module(&self, name: &str) -> Result<(), ModuleError> {
        let module = self.deps.catalogue.resolve(name)?.clone();
        let mut options = OptionSet::from_manifest(module.manifest());
        if module.is_shipped() {
            options.insert_if_missing(
                DOWNLOAD_ADDR,
                &OptionSpec::new(
                    "Download URL for this module, useful when an agent acts as a caching server",
                    "",
                ),
            );
        }
        if let RunnableModule::Interactive(_) = module {
            options.insert_if_missing(
                INTERACTIVE_ARGS,
                &OptionSpec::new("Arguments passed to the interactive module", ""),
            );
        }

        tracing::info!("Using module {:?}: {}", name, module.manifest().comment);
        *lock(&self.active) = Some(ActiveModule { module, options });
        self.state.send_replace(EngineState::Selected);
        Ok(())
    }

    /// Name of the active module
    pub fn active_module(&self) -> Option<String> {
        lock(&self.active).as_ref().map(|a| a.module.name().to_string())
    }

    /// Set an option of the active module
    pub fn set_option(&self, name: &str, value: &str) -> Result<(), ModuleError> {
        let mut active = lock(&self.active);
        let active = active
            .as_mut()
            .ok_or_else(|| ModuleError::Configuration("no active module".into()))?;
        active.options.set(name, value)?;
        tracing::debug!("{} => {}", name, value);
        self.state.send_replace(EngineState::Configured);
        Ok(())
    }

    /// Options of the active module
    pub fn options(&self) -> Option<OptionSet> {
        lock(&self.active).as_ref().map(|a| a.options.clone())
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Checks that must pass before anything runs
    fn prepare(&self) -> Result<Job, ModuleError> {
        let active = lock(&self.active);
        let active = active
            .as_ref()
            .ok_or_else(|| ModuleError::Configuration("no active module".into()))?;
        let manifest = active.module.manifest();
        let target = self.deps.agents.active_agent();

        if let Some(agent) = &target {
            if !agent.supports_platform(&manifest.platform) {
                return Err(ModuleError::TargetUnavailable(format!(
                    "module {:?} does not support {}",
                    manifest.name, agent.os
                )));
            }
        }
        // modules with a build step build first, then fail on the missing target
        if target.is_none() && active.module.needs_target() && manifest.build.is_empty() {
            return Err(ModuleError::TargetUnavailable("target not specified".into()));
        }
        if matches!(active.module, RunnableModule::Interactive(_)) && self.deps.bridge.is_none() {
            return Err(ModuleError::Configuration(format!(
                "module {:?} is interactive but no bridge is configured",
                manifest.name
            )));
        }

        Ok(Job {
            module: active.module.clone(),
            options: active.options.clone(),
            target,
        })
    }

    /// Dispatch the active module in the background.
    ///
    /// Returns once the target checks pass; the outcome is only visible in
    /// the logs, the result table and [`state`](Self::state).
    pub fn run(&self) -> Result<(), ModuleError> {
        let job = self.prepare()?;
        self.state.send_replace(EngineState::Dispatched);

        let deps = Arc::clone(&self.deps);
        let state = Arc::clone(&self.state);
        let cancel = self.shutdown.clone();
        self.tracker.spawn(async move {
            let name = job.module.name().to_string();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!("Module {} cancelled by shutdown", name);
                    state.send_replace(EngineState::Failed);
                }
                result = job.execute(&deps) => finish(&state, &name, &result),
            }
        });
        Ok(())
    }

    /// Dispatch the active module and wait for the pipeline to finish
    pub async fn run_and_wait(&self) -> Result<(), ModuleError> {
        let job = self.prepare()?;
        self.state.send_replace(EngineState::Dispatched);
        let result = job.execute(&self.deps).await;
        finish(&self.state, job.module.name(), &result);
        result
    }

    /// Cancel running dispatches and wait for them
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn finish(state: &watch::Sender<EngineState>, name: &str, result: &Result<(), ModuleError>) {
    match result {
        Ok(()) => {
            tracing::info!("Module {} completed", name);
            state.send_replace(EngineState::Completed);
        }
        Err(e) => {
            tracing::error!("Module {}: {}", name, e);
            state.send_replace(EngineState::Failed);
        }
    }
}

impl Job {
    fn require_target(&self) -> Result<&Arc<Agent>, ModuleError> {
        self.target
            .as_ref()
            .ok_or_else(|| ModuleError::TargetUnavailable("target not specified".into()))
    }

    async fn execute(&self, deps: &EngineDeps) -> Result<(), ModuleError> {
        match &self.module {
            RunnableModule::BuiltIn { command, .. } => {
                builtin::execute(*command, deps, self.require_target()?, &self.options).await
            }
            _ => self.dispatch(deps).await,
        }
    }

    async fn dispatch(&self, deps: &EngineDeps) -> Result<(), ModuleError> {
        let manifest = self.module.manifest();

        if !manifest.build.is_empty() {
            let output = build_module(manifest, &self.options).await?;
            tracing::info!("Module output:\n{}", output);
        }

        if let RunnableModule::Plugin(_) = self.module {
            tracing::info!(
                "{} runs as a plugin on the coordinator, nothing is sent to the target",
                manifest.name
            );
            return Ok(());
        }

        let target = self.require_target()?;
        let download_addr = self.options.value(DOWNLOAD_ADDR);
        let env = self.options.env_string();

        if manifest.agent.in_memory {
            let staged = stage(manifest, &deps.settings.www_root, stage_in_memory).await?;
            let cmd = CommandLine::new(VERB_CUSTOM_MODULE)
                .opt("mod_name", &manifest.name)
                .opt("type", &manifest.agent.payload_type)
                .opt("file_to_download", &staged.file_name)
                .opt("checksum", &staged.checksum)
                .flag("in_mem")
                .opt("env", &env)
                .opt_if_set("download_addr", download_addr)
                .build();
            deps.broker.send(&cmd, &CommandId::generate(), &target.tag).await?;
            return Ok(());
        }

        let staged = stage(manifest, &deps.settings.www_root, stage_archive).await?;
        let interactive = matches!(self.module, RunnableModule::Interactive(_));
        let exec = if interactive {
            format!("echo {}", sha256_hex(&deps.settings.magic_string))
        } else {
            manifest.agent.exec.clone()
        };
        let cmd = CommandLine::new(VERB_CUSTOM_MODULE)
            .opt("mod_name", &manifest.name)
            .opt("checksum", &staged.checksum)
            .opt("env", &env)
            .opt("type", &manifest.agent.payload_type)
            .opt("file_to_download", &staged.file_name)
            .opt("exec", &exec)
            .opt_if_set("download_addr", download_addr)
            .build();
        let id = CommandId::generate();
        deps.broker.send(&cmd, &id, &target.tag).await?;

        if interactive {
            attach_interactive(deps, manifest, &self.options, target, &id).await?;
        }
        Ok(())
    }
}

/// Run a blocking staging step off the runtime
async fn stage(
    manifest: &Arc<ModuleManifest>,
    www_root: &std::path::Path,
    step: fn(&ModuleManifest, &std::path::Path) -> Result<StagedPayload, ModuleError>,
) -> Result<StagedPayload, ModuleError> {
    let manifest = Arc::clone(manifest);
    let www_root = www_root.to_path_buf();
    tokio::task::spawn_blocking(move || step(&manifest, &www_root))
        .await
        .map_err(|e| ModuleError::Io(std::io::Error::other(e)))?
}

/// Wait for the readiness check, then open the interactive bridge.
///
/// The readiness result is removed from the table whatever happens.
async fn attach_interactive(
    deps: &EngineDeps,
    manifest: &ModuleManifest,
    options: &OptionSet,
    target: &Agent,
    ready_id: &CommandId,
) -> Result<(), ModuleError> {
    let expected = sha256_hex(&deps.settings.magic_string);
    let ready = wait_until_ready(deps, ready_id, &expected).await;
    deps.broker.discard(ready_id);

    if !ready {
        return Err(ModuleError::Timeout(format!(
            "{} did not report ready after {} checks",
            manifest.name, deps.settings.ready_retries
        )));
    }

    let bridge = deps.bridge.as_ref().ok_or_else(|| {
        ModuleError::Configuration("no interactive bridge configured".into())
    })?;
    let port = rand::thread_rng().gen_range(BRIDGE_PORTS);
    let request = BridgeRequest {
        agent: target.tag.clone(),
        exec_path: format!(
            "{}/{}/{}",
            deps.settings.agent_root, manifest.name, manifest.agent.exec
        ),
        args: options.value(INTERACTIVE_ARGS).to_string(),
        port,
    };
    tracing::info!(agent = %target.tag, "Opening interactive bridge to {} on port {}", request.exec_path, port);
    bridge.open(request).await?;
    Ok(())
}

async fn wait_until_ready(deps: &EngineDeps, ready_id: &CommandId, expected: &str) -> bool {
    for _ in 0..deps.settings.ready_retries {
        match deps.broker.await_result(ready_id, deps.settings.ready_interval).await {
            Some(reply) if reply.contains(expected) => return true,
            Some(reply) => tracing::debug!(command_id = %ready_id, "Unexpected readiness reply: {}", reply),
            None => {}
        }
    }
    false
}
