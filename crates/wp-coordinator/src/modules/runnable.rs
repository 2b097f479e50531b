//! Module kinds, resolved once by name

use std::sync::Arc;

use super::manifest::{ModuleManifest, OptionSpec, BUILTIN_EXEC};

/// Commands implemented inside the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    /// Run a shell command on the target and show the reply
    CmdExec,
    /// Start or stop a port forward
    PortFwd,
    /// Start or stop the agent SOCKS proxy
    Proxy,
}

impl BuiltinCommand {
    /// Every built-in
    pub const ALL: [BuiltinCommand; 3] = [Self::CmdExec, Self::PortFwd, Self::Proxy];

    /// Module name
    pub fn name(&self) -> &'static str {
        match self {
            Self::CmdExec => "cmd_exec",
            Self::PortFwd => "port_fwd",
            Self::Proxy => "proxy",
        }
    }

    /// Manifest describing the built-in and its options
    pub fn manifest(&self) -> ModuleManifest {
        let mut manifest = ModuleManifest::new(self.name());
        manifest.agent.exec = BUILTIN_EXEC.to_string();
        let options = &mut manifest.options;
        match self {
            Self::CmdExec => {
                manifest.comment = "Run a single command on the target".into();
                options.insert(
                    "cmd_to_exec".into(),
                    OptionSpec::new("Command line to run on the target", ""),
                );
            }
            Self::PortFwd => {
                manifest.comment = "Forward ports between the coordinator and the target".into();
                options.insert(
                    "switch".into(),
                    OptionSpec::new("Turn port mapping on/off, or reverse it", "on")
                        .allowed(&["on", "off", "reverse"]),
                );
                options.insert(
                    "to".into(),
                    OptionSpec::new("Destination address (host:port)", ""),
                );
                options.insert(
                    "listen_port".into(),
                    OptionSpec::new("Port to listen on", ""),
                );
                options.insert(
                    "bind_addr".into(),
                    OptionSpec::new("Address to bind the listener to", "127.0.0.1"),
                );
                options.insert(
                    "protocol".into(),
                    OptionSpec::new("Forward TCP or UDP", "tcp").allowed(&["tcp", "udp"]),
                );
                options.insert(
                    "timeout".into(),
                    OptionSpec::new("Idle timeout in seconds, empty for none", ""),
                );
            }
            Self::Proxy => {
                manifest.comment = "Expose the target's SOCKS5 proxy locally".into();
                options.insert(
                    "status".into(),
                    OptionSpec::new("Turn proxy on/off", "on").allowed(&["on", "off"]),
                );
                options.insert(
                    "port".into(),
                    OptionSpec::new("Local port of the proxy", "8080"),
                );
                options.insert(
                    "bind_addr".into(),
                    OptionSpec::new("Address to bind the proxy to", "127.0.0.1"),
                );
            }
        }
        manifest
    }

    /// Look up a built-in by module name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// A module, tagged with how it runs
#[derive(Debug, Clone)]
pub enum RunnableModule {
    /// Implemented inside the coordinator
    BuiltIn {
        manifest: Arc<ModuleManifest>,
        command: BuiltinCommand,
    },
    /// Shipped to the agent and started there
    Packaged(Arc<ModuleManifest>),
    /// Shipped to the agent, then attached to through an interactive bridge
    Interactive(Arc<ModuleManifest>),
    /// Runs on the coordinator only
    Plugin(Arc<ModuleManifest>),
}

impl RunnableModule {
    /// Decide how a manifest runs
    pub fn resolve(manifest: ModuleManifest) -> Self {
        if let Some(command) = BuiltinCommand::from_name(&manifest.name).filter(|_| manifest.is_builtin()) {
            return Self::BuiltIn {
                manifest: Arc::new(manifest),
                command,
            };
        }
        let manifest = Arc::new(manifest);
        if manifest.is_local {
            Self::Plugin(manifest)
        } else if manifest.agent.is_interactive && !manifest.agent.in_memory {
            // in-memory payloads have no executable to attach to
            Self::Interactive(manifest)
        } else {
            Self::Packaged(manifest)
        }
    }

    /// The built-in module for `command`
    pub fn builtin(command: BuiltinCommand) -> Self {
        Self::BuiltIn {
            manifest: Arc::new(command.manifest()),
            command,
        }
    }

    pub fn manifest(&self) -> &Arc<ModuleManifest> {
        match self {
            Self::BuiltIn { manifest, .. }
            | Self::Packaged(manifest)
            | Self::Interactive(manifest)
            | Self::Plugin(manifest) => manifest,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest().name
    }

    /// Whether dispatch needs a selected target
    pub fn needs_target(&self) -> bool {
        !matches!(self, Self::Plugin(_))
    }

    /// Whether the module is downloaded by agents (and so can take a
    /// download address override)
    pub fn is_shipped(&self) -> bool {
        matches!(self, Self::Packaged(_) | Self::Interactive(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_kinds() {
        let mut plugin = ModuleManifest::new("p");
        plugin.is_local = true;
        assert!(matches!(RunnableModule::resolve(plugin), RunnableModule::Plugin(_)));

        let mut interactive = ModuleManifest::new("i");
        interactive.agent.is_interactive = true;
        assert!(matches!(
            RunnableModule::resolve(interactive.clone()),
            RunnableModule::Interactive(_)
        ));

        interactive.agent.in_memory = true;
        assert!(matches!(
            RunnableModule::resolve(interactive),
            RunnableModule::Packaged(_)
        ));

        let builtin = RunnableModule::resolve(BuiltinCommand::PortFwd.manifest());
        assert!(matches!(
            builtin,
            RunnableModule::BuiltIn { command: BuiltinCommand::PortFwd, .. }
        ));
        assert!(!builtin.is_shipped());
    }

    #[test]
    fn test_builtin_manifests_are_valid() {
        for command in BuiltinCommand::ALL {
            let manifest = command.manifest();
            assert!(manifest.validate().is_ok(), "{}", command.name());
            assert!(manifest.is_builtin());
            assert_eq!(BuiltinCommand::from_name(command.name()), Some(command));
        }
    }
}
