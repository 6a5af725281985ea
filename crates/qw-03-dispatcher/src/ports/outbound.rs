//! Outbound ports (driven side).

use async_trait::async_trait;
use shared_types::{Policy, SlotNumber};

/// Starts worker processes and replaces them on request.
///
/// The dispatcher calls these methods after releasing its lock, at most once
/// per failure event. Implementations must return quickly; long-running work
/// (spawning a process, running a command) belongs on a spawned task.
#[async_trait]
pub trait WorkerSupervisor: Send + Sync {
    /// Starts `policy.number_of_workers` workers. A second call is a no-op.
    fn start_supervision(&self, policy: &Policy);

    /// The slot's worker crashed, disconnected, or wedged.
    fn worker_failed(&self, slot: SlotNumber);

    /// The slot's worker announced a voluntary exit (`will_exit`).
    fn worker_recycling(&self, slot: SlotNumber) {
        self.worker_failed(slot);
    }

    /// Stops every worker cleanly.
    async fn shutdown(&self);
}
