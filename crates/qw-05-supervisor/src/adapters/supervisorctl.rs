//! [`ProcessManager`] driving supervisord through `supervisorctl`.
//!
//! Workers are expected to be configured as one supervisord group whose
//! programs are named `<group>_<n>`:
//!
//! ```text
//! start   <group>:*
//! restart <group>:<group>_<n>
//! stop    <group>:*
//! ```

use crate::domain::SupervisorError;
use crate::ports::ProcessManager;
use async_trait::async_trait;
use shared_types::SlotNumber;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_GROUP: &str = "qw-worker";

pub fn start_args(group: &str) -> Vec<String> {
    vec!["start".to_string(), format!("{group}:*")]
}

pub fn restart_args(group: &str, slot: SlotNumber) -> Vec<String> {
    vec!["restart".to_string(), format!("{group}:{group}_{slot}")]
}

pub fn stop_args(group: &str) -> Vec<String> {
    vec!["stop".to_string(), format!("{group}:*")]
}

#[derive(Debug, Clone)]
pub struct SupervisorctlManager {
    program: PathBuf,
    group: String,
}

impl SupervisorctlManager {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("supervisorctl"),
            group: group.into(),
        }
    }

    /// Uses a different `supervisorctl` binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    async fn run(&self, args: Vec<String>) -> Result<(), SupervisorError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        debug!(command = %command, "[supervisor] Running");
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SupervisorError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SupervisorError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(command = %command, "[supervisor] Command succeeded");
        Ok(())
    }
}

impl Default for SupervisorctlManager {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP)
    }
}

#[async_trait]
impl ProcessManager for SupervisorctlManager {
    async fn launch(&self) -> Result<(), SupervisorError> {
        self.run(start_args(&self.group)).await
    }

    async fn restart_worker(&self, slot: SlotNumber) -> Result<(), SupervisorError> {
        self.run(restart_args(&self.group, slot)).await
    }

    async fn stop_all(&self) -> Result<(), SupervisorError> {
        self.run(stop_args(&self.group)).await
    }
}
