//! Outbound ports (driven side).

use crate::domain::SupervisorError;
use async_trait::async_trait;
use shared_types::SlotNumber;

/// External manager of worker processes (supervisord or similar).
#[async_trait]
pub trait ProcessManager: Send + Sync + 'static {
    /// Starts every worker process in the group.
    async fn launch(&self) -> Result<(), SupervisorError>;

    /// Restarts the process for one slot only.
    async fn restart_worker(&self, slot: SlotNumber) -> Result<(), SupervisorError>;

    /// Stops every worker process in the group.
    async fn stop_all(&self) -> Result<(), SupervisorError>;
}
