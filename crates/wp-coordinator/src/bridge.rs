//! Interactive bridge backed by an external program

use async_trait::async_trait;
use tokio::process::Command;

use wp_core::traits::{BridgeRequest, InteractiveBridge};
use wp_core::TransportError;
use wp_protocol::parse_cmd;

/// Runs `<program> <agent> <port> <exec_path> [args...]` and waits for it
///
/// The program inherits the terminal, so the operator talks to the module
/// directly until it exits.
pub struct ProcessBridge {
    program: String,
}

impl ProcessBridge {
    /// Create a bridge that invokes `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, request: &BridgeRequest) -> Result<Command, TransportError> {
        let args = parse_cmd(&request.args)
            .map_err(|e| TransportError::Rejected(format!("bad module arguments: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(request.agent.as_str())
            .arg(request.port.to_string())
            .arg(&request.exec_path)
            .args(args)
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl InteractiveBridge for ProcessBridge {
    async fn open(&self, request: BridgeRequest) -> Result<(), TransportError> {
        let status = self
            .command(&request)?
            .status()
            .await
            .map_err(|e| TransportError::Rejected(format!("{}: {}", self.program, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(format!(
                "{} exited with {}",
                self.program, status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(args: &str) -> BridgeRequest {
        BridgeRequest {
            agent: "agent-1".into(),
            exec_path: "/tmp/.waypost/shell/run".into(),
            args: args.into(),
            port: 4242,
        }
    }

    #[tokio::test]
    async fn test_bridge_exit_status() {
        assert!(ProcessBridge::new("true").open(request("")).await.is_ok());
        assert!(ProcessBridge::new("false").open(request("")).await.is_err());
    }

    #[test]
    fn test_bridge_arguments() {
        let cmd = ProcessBridge::new("attach").command(&request("-l 'a b'")).unwrap();
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["agent-1", "4242", "/tmp/.waypost/shell/run", "-l", "a b"]
        );
    }

    #[test]
    fn test_bridge_without_arguments() {
        let cmd = ProcessBridge::new("attach").command(&request("")).unwrap();
        assert_eq!(cmd.as_std().get_args().count(), 3);
    }

    #[test]
    fn test_bridge_rejects_unbalanced_quotes() {
        assert!(matches!(
            ProcessBridge::new("attach").command(&request("-c 'oops")),
            Err(TransportError::Rejected(_))
        ));
    }
}
