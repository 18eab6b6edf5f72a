//! System power-off collaborator.

use crate::error::{Result, SupervisorError};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Issues the machine power-off request after graceful termination.
#[async_trait]
pub trait PowerControl: Send + Sync + 'static {
    async fn power_off(&self) -> Result<()>;
}

/// Runs an external command (by default `systemctl poweroff`).
#[derive(Debug, Clone)]
pub struct CommandPowerControl {
    program: String,
    args: Vec<String>,
}

impl CommandPowerControl {
    /// Build from a command line whose first element is the program.
    pub fn from_command_line(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            SupervisorError::InvalidParams {
                message: "power-off command is empty".to_string(),
            }
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl PowerControl for CommandPowerControl {
    async fn power_off(&self) -> Result<()> {
        info!("Requesting power-off: {} {}", self.program, self.args.join(" "));

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| {
                SupervisorError::Other(format!("Failed to execute {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Power-off command failed: {}", stderr.trim());
            return Err(SupervisorError::Other(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Records power-off requests instead of acting on them.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingPowerControl {
    requests: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl RecordingPowerControl {
    pub(crate) fn requests(&self) -> usize {
        self.requests.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl PowerControl for RecordingPowerControl {
    async fn power_off(&self) -> Result<()> {
        self.requests
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandPowerControl::from_command_line(&[]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_power_control_runs_program() {
        let ok = CommandPowerControl::from_command_line(&["/bin/true".to_string()]).unwrap();
        ok.power_off().await.unwrap();

        let failing = CommandPowerControl::from_command_line(&[
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo denied >&2; exit 1".to_string(),
        ])
        .unwrap();
        let err = failing.power_off().await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }
}
