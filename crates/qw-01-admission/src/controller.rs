//! Admission controller: per-application gate, then a script permit.

use crate::gate::ApplicationGate;
use crate::limits::ConcurrencyLimits;
use parking_lot::Mutex;
use shared_types::{AdmissionError, ApplicationId, SpinBudget};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// Health-check prefix for an exhausted application gate.
pub const CONCURRENCY_APP_PREFIX: &str = "CONCURRENCY_APP_";

/// Throttles script-layer work per application and process-wide.
#[derive(Debug)]
pub struct AdmissionController {
    limits: Arc<ConcurrencyLimits>,
    gates: Mutex<HashMap<ApplicationId, Arc<ApplicationGate>>>,
    budget: SpinBudget,
    gate_permits: usize,
}

impl AdmissionController {
    /// Default application spin budget: 5 spins of 4 ms.
    pub const DEFAULT_BUDGET: SpinBudget =
        SpinBudget::new(5, std::time::Duration::from_millis(4));

    pub fn new(limits: Arc<ConcurrencyLimits>) -> Self {
        Self::with_budget(limits, Self::DEFAULT_BUDGET, ApplicationGate::DEFAULT_PERMITS)
    }

    pub fn with_budget(limits: Arc<ConcurrencyLimits>, budget: SpinBudget, gate_permits: usize) -> Self {
        Self {
            limits,
            gates: Mutex::new(HashMap::new()),
            budget,
            gate_permits,
        }
    }

    pub fn limits(&self) -> &Arc<ConcurrencyLimits> {
        &self.limits
    }

    /// The gate for `app`, created on first use.
    pub fn gate(&self, app: ApplicationId) -> Arc<ApplicationGate> {
        self.gates
            .lock()
            .entry(app)
            .or_insert_with(|| Arc::new(ApplicationGate::new(self.gate_permits)))
            .clone()
    }

    /// Runs `action` inside the application gate while holding a script permit.
    pub async fn throttle<F, T>(&self, app: ApplicationId, action: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = T>,
    {
        let gate = self.gate(app);
        let pass = gate.enter(self.budget).await?;
        let permit = self.limits.acquire_script().await?;
        trace!(application = %app, spins = pass.spins(), "[admission] admitted");

        let output = action.await;

        drop(permit);
        drop(pass);
        Ok(output)
    }

    /// Process-wide and per-application exhaustion names; empty when healthy.
    pub fn health_check(&self) -> Vec<String> {
        let mut problems = self.limits.health_check();
        let gates = self.gates.lock();
        let mut exhausted: Vec<_> = gates
            .iter()
            .filter(|(_, gate)| gate.is_exhausted())
            .map(|(app, _)| app.0)
            .collect();
        exhausted.sort_unstable();
        problems.extend(
            exhausted
                .into_iter()
                .map(|id| format!("{CONCURRENCY_APP_PREFIX}{id}")),
        );
        problems
    }
}
