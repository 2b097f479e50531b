//! Built-in modules

use std::time::Duration;

use wp_core::{Agent, ModuleError, Protocol, RelayError};

use crate::tunnel::{start_proxy, stop_proxy, ProxySpec, SessionSpec};

use super::engine::EngineDeps;
use super::options::OptionSet;
use super::runnable::BuiltinCommand;

/// Run a built-in against `target`
pub(crate) async fn execute(
    command: BuiltinCommand,
    deps: &EngineDeps,
    target: &Agent,
    options: &OptionSet,
) -> Result<(), ModuleError> {
    match command {
        BuiltinCommand::CmdExec => cmd_exec(deps, target, options).await,
        BuiltinCommand::PortFwd => port_fwd(deps, target, options).await,
        BuiltinCommand::Proxy => proxy(deps, target, options).await,
    }
}

async fn cmd_exec(deps: &EngineDeps, target: &Agent, options: &OptionSet) -> Result<(), ModuleError> {
    let cmd = options.required("cmd_to_exec")?;
    let reply = deps
        .broker
        .send_and_await(cmd, &target.tag, deps.settings.command_timeout)
        .await?;
    match reply {
        Some(output) => {
            tracing::info!(agent = %target.tag, "{}:\n{}", cmd, output);
            Ok(())
        }
        None => Err(ModuleError::Timeout(format!(
            "no reply to {:?} from {}",
            cmd, target.tag
        ))),
    }
}

/// Empty means no timeout; otherwise whole seconds
fn parse_timeout(value: &str) -> Result<Option<Duration>, ModuleError> {
    match value.trim() {
        "" => Ok(None),
        secs => secs
            .parse::<u64>()
            .map(|s| Some(Duration::from_secs(s)))
            .map_err(|_| ModuleError::Configuration(format!("invalid timeout '{}'", secs))),
    }
}

async fn port_fwd(deps: &EngineDeps, target: &Agent, options: &OptionSet) -> Result<(), ModuleError> {
    let to = options.required("to")?;
    let listen_port = options.required("listen_port")?;
    let protocol: Protocol = options
        .value("protocol")
        .parse()
        .map_err(ModuleError::Configuration)?;
    let timeout = parse_timeout(options.value("timeout"))?;

    match options.value("switch") {
        "on" => {
            let spec = SessionSpec::forward(target.tag.clone(), to, listen_port)
                .with_protocol(protocol)
                .with_bind_addr(options.value("bind_addr"))
                .with_timeout(timeout);
            let session = deps.relay.run_port_fwd(spec).await?;
            tracing::info!(
                "Port mapping {} is up, make a connection and it will appear in `ls_port_fwds`",
                session.id
            );
        }
        "reverse" => {
            let spec = SessionSpec::reverse(target.tag.clone(), to, listen_port)
                .with_protocol(protocol)
                .with_bind_addr(options.value("bind_addr"))
                .with_timeout(timeout);
            deps.relay.init_reversed_port_fwd(spec).await?;
        }
        "off" => {
            let stopped = deps.relay.stop_matching(to, listen_port, protocol).await?;
            tracing::info!("Stopped {} port mapping(s) to {} on port {}", stopped, to, listen_port);
        }
        other => {
            return Err(ModuleError::Configuration(format!(
                "unknown switch '{}'",
                other
            )))
        }
    }
    Ok(())
}

async fn proxy(deps: &EngineDeps, target: &Agent, options: &OptionSet) -> Result<(), ModuleError> {
    let settings = &deps.settings;
    let proxy = ProxySpec::new(
        target.tag.clone(),
        options.value("bind_addr"),
        options.required("port")?,
        settings.socks_port,
        settings.socks_timeout,
    );

    match options.value("status") {
        "on" => {
            start_proxy(&deps.relay, &deps.broker, &proxy, settings.proxy_start_timeout).await?;
            tracing::info!(
                "Agent proxy listening on {}:{} (TCP and UDP)",
                proxy.bind_addr,
                proxy.port
            );
            Ok(())
        }
        "off" => match stop_proxy(&deps.relay, &proxy).await {
            0 => Err(RelayError::NoMatchingSession {
                to: proxy.socks_addr(),
                listen_port: proxy.port.clone(),
            }
            .into()),
            stopped => {
                tracing::info!("Stopped {} proxy session(s)", stopped);
                Ok(())
            }
        },
        other => Err(ModuleError::Configuration(format!(
            "unknown operation '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("").unwrap(), None);
        assert_eq!(parse_timeout(" 30 ").unwrap(), Some(Duration::from_secs(30)));
        assert!(parse_timeout("soon").is_err());
    }
}
