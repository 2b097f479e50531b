//! Operator console on stdin

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use wp_core::AgentTag;
use wp_protocol::parse_cmd;

use crate::state::CoordinatorState;

const HELP: &str = "\
agents                    list connected agents
target <tag>              select the target agent
use <module>              select a module
set <option> <value>      set an option of the active module
options                   show options of the active module
run                       run the active module
search <keyword>          search modules
info <module>             show module details
ls_port_fwds              list port mappings
delete_port_fwd <id>      stop a port mapping
exit                      stop the coordinator";

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Agents,
    Target(String),
    Use(String),
    Set(String, String),
    Options,
    Run,
    Search(String),
    Info(String),
    ListPortFwds,
    DeletePortFwd(String),
    Exit,
}

impl ConsoleCommand {
    /// Parse a console line; blank lines give `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let tokens = parse_cmd(line)?;
        let Some((verb, args)) = tokens.split_first() else {
            return Ok(None);
        };
        let arg = |usage: &str| {
            args.first()
                .cloned()
                .ok_or_else(|| anyhow!("usage: {}", usage))
        };

        let cmd = match verb.as_str() {
            "help" | "?" => Self::Help,
            "agents" => Self::Agents,
            "target" => Self::Target(arg("target <tag>")?),
            "use" => Self::Use(arg("use <module>")?),
            "set" => match args {
                [name, value @ ..] => Self::Set(name.clone(), value.join(" ")),
                [] => bail!("usage: set <option> <value>"),
            },
            "options" => Self::Options,
            "run" => Self::Run,
            "search" => Self::Search(arg("search <keyword>")?),
            "info" => Self::Info(arg("info <module>")?),
            "ls_port_fwds" => Self::ListPortFwds,
            "delete_port_fwd" => Self::DeletePortFwd(arg("delete_port_fwd <id>")?),
            "exit" | "quit" => Self::Exit,
            other => bail!("unknown command '{}', try 'help'", other),
        };
        Ok(Some(cmd))
    }
}

/// Reads operator commands and applies them to the coordinator
pub struct Console {
    state: Arc<CoordinatorState>,
}

impl Console {
    /// Create a console over the coordinator state
    pub fn new(state: Arc<CoordinatorState>) -> Self {
        Self { state }
    }

    /// Apply one command. Returns `false` when the operator asked to exit.
    pub async fn execute(&self, cmd: ConsoleCommand) -> Result<bool> {
        let state = &self.state;
        match cmd {
            ConsoleCommand::Help => tracing::info!("Commands:\n{}", HELP),
            ConsoleCommand::Agents => {
                let agents = state.agents.list();
                let active = state.agents.active_agent().map(|a| a.tag.clone());
                tracing::info!("{} agent(s) connected", agents.len());
                for agent in agents {
                    let marker = if Some(&agent.tag) == active.as_ref() { "*" } else { " " };
                    tracing::info!(
                        "{} {} {}@{} ({}) from {} ips={}",
                        marker,
                        agent.tag,
                        agent.user,
                        agent.hostname,
                        agent.os,
                        agent.from,
                        agent.ips.join(",")
                    );
                }
            }
            ConsoleCommand::Target(tag) => {
                if !state.agents.set_active(&AgentTag::new(tag.clone())) {
                    bail!("no such agent: {}", tag);
                }
                tracing::info!("Target set to {}", tag);
            }
            ConsoleCommand::Use(name) => state.engine.set_active_module(&name)?,
            ConsoleCommand::Set(name, value) => {
                state.engine.set_option(&name, &value)?;
                tracing::info!("{} => {}", name, value);
            }
            ConsoleCommand::Options => {
                let options = state
                    .engine
                    .options()
                    .ok_or_else(|| anyhow!("no active module"))?;
                for (name, option) in options.iter() {
                    tracing::info!("{:<16} {:<24} {}", name, option.value, option.description);
                }
            }
            ConsoleCommand::Run => state.engine.run()?,
            ConsoleCommand::Search(keyword) => {
                for manifest in state.engine.deps().catalogue.search(&keyword) {
                    tracing::info!("{:<20} {}", manifest.name, manifest.comment);
                }
            }
            ConsoleCommand::Info(name) => {
                let details = state
                    .engine
                    .deps()
                    .catalogue
                    .details(&name)
                    .ok_or_else(|| anyhow!("no such module: {}", name))?;
                tracing::info!("Module details:\n{}", serde_json::to_string_pretty(&details)?);
            }
            ConsoleCommand::ListPortFwds => {
                let sessions = state.relay.list_sessions();
                tracing::info!("{} port mapping(s)", sessions.len());
                for s in sessions {
                    tracing::info!(
                        "{} [{} {}] {}",
                        s.id,
                        s.protocol,
                        s.direction,
                        s.description
                    );
                }
            }
            ConsoleCommand::DeletePortFwd(id) => {
                state.relay.stop_session(&id).await?;
            }
            ConsoleCommand::Exit => return Ok(false),
        }
        Ok(true)
    }

    /// Read commands from stdin until EOF, `exit` or cancellation
    pub async fn run(self, cancel: CancellationToken) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Failed to read console input: {}", e);
                        break;
                    }
                },
            };

            let cmd = match ConsoleCommand::parse(&line) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("{}", e);
                    continue;
                }
            };
            match self.execute(cmd).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => tracing::error!("{:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleCatalogue;
    use wp_core::config::CoordinatorConfig;
    use wp_core::Agent;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
        assert_eq!(
            ConsoleCommand::parse("set cmd_to_exec 'uname -a'").unwrap(),
            Some(ConsoleCommand::Set("cmd_to_exec".into(), "uname -a".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("set to 10.0.0.5:80").unwrap(),
            Some(ConsoleCommand::Set("to".into(), "10.0.0.5:80".into()))
        );
        assert_eq!(ConsoleCommand::parse("run").unwrap(), Some(ConsoleCommand::Run));
        assert!(ConsoleCommand::parse("use").is_err());
        assert!(ConsoleCommand::parse("launch").is_err());
    }

    #[tokio::test]
    async fn test_console_drives_engine() {
        let state = Arc::new(CoordinatorState::new(
            CoordinatorConfig::default(),
            ModuleCatalogue::with_builtins(),
            None,
        ));
        let console = Console::new(Arc::clone(&state));

        assert!(console.execute(ConsoleCommand::Target("ghost".into())).await.is_err());
        state.agents.insert(Agent::new("a", "linux"));
        console.execute(ConsoleCommand::Target("a".into())).await.unwrap();

        console.execute(ConsoleCommand::Use("port_fwd".into())).await.unwrap();
        console
            .execute(ConsoleCommand::Set("protocol".into(), "udp".into()))
            .await
            .unwrap();
        assert_eq!(state.engine.options().unwrap().value("protocol"), "udp");
        assert!(console
            .execute(ConsoleCommand::Set("protocol".into(), "sctp".into()))
            .await
            .is_err());

        assert!(!console.execute(ConsoleCommand::Exit).await.unwrap());
    }
}
