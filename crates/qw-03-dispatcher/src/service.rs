//! # Dispatcher Service
//!
//! Single serialization point for the pending queue and the slot table.
//!
//! ```text
//!  submit ──► [ queue: FIFO ] ──next_work──► slot N (BUSY) ──finished_work──► NotifyTarget
//!                  ▲                             │
//!                  └──── return_work (front) ◄───┤ no acknowledgement
//!                                                ├── connection_closed ──► Lost + worker_failed
//!                                                └── deadline passed   ──► TimedOut
//! ```
//!
//! Every transition happens under one `parking_lot::Mutex`. Side effects
//! (notify targets, supervisor calls, waking connections) are collected while
//! locked and applied after the lock is released.

use crate::domain::queue::{PendingQueue, QueueEntry};
use crate::domain::slot::{Assigned, WorkerSlot};
use crate::domain::{Assignment, DispatchError, SlotHandle, SlotSnapshot, SlotState};
use crate::ports::WorkerSupervisor;
use crate::stats::{DispatchStats, DispatchStatsSnapshot};
use parking_lot::{Mutex, RwLock};
use qw_01_admission::ConcurrencyLimits;
use qw_02_notify::NotifyTarget;
use qw_telemetry::metrics;
use shared_types::{
    AdmissionError, ApplicationId, OperationEnvelope, OperationError, OperationId, Outcome,
    Policy, SlotNumber, SubmitError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Work to do once the state lock is released.
enum Effect {
    Deliver {
        target: Arc<dyn NotifyTarget>,
        operation_id: OperationId,
        outcome: Outcome,
    },
    WorkerFailed(SlotNumber),
    WorkerRecycling(SlotNumber),
    Wake(SlotNumber),
}

struct DispatchState {
    queue: PendingQueue,
    slots: Vec<WorkerSlot>,
    shut_down: bool,
}

impl DispatchState {
    fn slot_mut(&mut self, handle: SlotHandle) -> Result<&mut WorkerSlot, DispatchError> {
        let workers = self.slots.len();
        let slot = self
            .slots
            .get_mut(handle.number)
            .ok_or(DispatchError::BadWorkerNumber {
                number: handle.number,
                workers,
            })?;
        if slot.generation != handle.generation {
            return Err(DispatchError::StaleHandle {
                slot: handle.number,
                generation: handle.generation,
                current: slot.generation,
            });
        }
        Ok(slot)
    }

    fn idle_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Idle)
            .count()
    }

    /// Lowest-numbered connected slot with nothing to do.
    fn lowest_idle(&self) -> Option<SlotNumber> {
        self.slots
            .iter()
            .find(|s| s.state == SlotState::Idle)
            .map(|s| s.number)
    }

    fn publish_gauges(&self) {
        metrics::QUEUE_DEPTH.set(self.queue.len() as i64);
        let busy = self
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Busy)
            .count();
        metrics::BUSY_SLOTS.set(busy as i64);
    }
}

fn in_flight_for(slots: &[WorkerSlot], application: ApplicationId) -> usize {
    slots
        .iter()
        .filter(|s| {
            s.current
                .as_ref()
                .is_some_and(|a| a.entry.application == application)
        })
        .count()
}

fn take_running(slot: &mut WorkerSlot, reported: OperationId) -> Result<Assigned, DispatchError> {
    let running = slot.running();
    if slot.state != SlotState::Busy || running != Some(reported) {
        return Err(DispatchError::WrongOperation {
            slot: slot.number,
            running,
            reported,
        });
    }
    slot.current.take().ok_or(DispatchError::WrongOperation {
        slot: slot.number,
        running: None,
        reported,
    })
}

/// Queue and slot-table owner.
pub struct Dispatcher {
    policy: Policy,
    state: Mutex<DispatchState>,
    work_signals: Vec<Notify>,
    capacity_changed: Notify,
    supervisor: RwLock<Option<Arc<dyn WorkerSupervisor>>>,
    limits: Option<Arc<ConcurrencyLimits>>,
    next_operation_id: AtomicU64,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(policy: Policy) -> Result<Self, DispatchError> {
        Self::build(policy, None)
    }

    /// Dispatcher that takes a worker-activity permit for every assignment.
    pub fn with_limits(policy: Policy, limits: Arc<ConcurrencyLimits>) -> Result<Self, DispatchError> {
        Self::build(policy, Some(limits))
    }

    fn build(policy: Policy, limits: Option<Arc<ConcurrencyLimits>>) -> Result<Self, DispatchError> {
        policy.validate()?;
        let workers = policy.number_of_workers;
        Ok(Self {
            state: Mutex::new(DispatchState {
                queue: PendingQueue::new(policy.max_queue_length),
                slots: (0..workers).map(WorkerSlot::new).collect(),
                shut_down: false,
            }),
            work_signals: (0..workers).map(|_| Notify::new()).collect(),
            capacity_changed: Notify::new(),
            supervisor: RwLock::new(None),
            limits,
            next_operation_id: AtomicU64::new(1),
            stats: DispatchStats::default(),
            policy,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Installs the supervisor and asks it to start the workers.
    pub fn use_supervisor(&self, supervisor: Arc<dyn WorkerSupervisor>) {
        *self.supervisor.write() = Some(Arc::clone(&supervisor));
        supervisor.start_supervision(&self.policy);
    }

    fn supervisor(&self) -> Option<Arc<dyn WorkerSupervisor>> {
        self.supervisor.read().clone()
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Enqueues an operation. Never blocks; fails fast when the queue is full.
    pub fn submit(
        &self,
        envelope: OperationEnvelope,
        application: ApplicationId,
        target: Arc<dyn NotifyTarget>,
    ) -> Result<OperationId, SubmitError> {
        let (operation_id, wake) = {
            let mut state = self.state.lock();
            self.enqueue_locked(&mut state, envelope, application, target)?
        };
        self.after_enqueue(operation_id, application, wake);
        Ok(operation_id)
    }

    /// Enqueues only if a worker is free to take the operation, waiting at
    /// most the policy's admission budget for one to become free.
    pub async fn submit_with_admission(
        &self,
        envelope: OperationEnvelope,
        application: ApplicationId,
        target: Arc<dyn NotifyTarget>,
    ) -> Result<OperationId, AdmissionError> {
        let budget = self.policy.admission;
        let started = Instant::now();

        for spin in 0..=budget.spins {
            let notified = self.capacity_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shut_down {
                    return Err(SubmitError::ShutDown.into());
                }
                if state.idle_slots() > state.queue.len() {
                    let (operation_id, wake) =
                        self.enqueue_locked(&mut state, envelope, application, target)?;
                    drop(state);
                    self.after_enqueue(operation_id, application, wake);
                    return Ok(operation_id);
                }
            }

            if spin < budget.spins {
                let _ = tokio::time::timeout(budget.wait, notified).await;
            }
        }

        self.stats
            .admission_rejections
            .fetch_add(1, Ordering::Relaxed);
        metrics::ADMISSION_REJECTIONS.inc();
        let waited = started.elapsed();
        info!(application = %application, spins = budget.spins, ?waited, "[dispatcher] Admission refused, no worker available");
        Err(AdmissionError::NoWorkerAvailable {
            spins: budget.spins,
            waited,
        })
    }

    fn enqueue_locked(
        &self,
        state: &mut DispatchState,
        envelope: OperationEnvelope,
        application: ApplicationId,
        target: Arc<dyn NotifyTarget>,
    ) -> Result<(OperationId, Option<SlotNumber>), SubmitError> {
        if state.shut_down {
            return Err(SubmitError::ShutDown);
        }
        let operation_id = OperationId(self.next_operation_id.fetch_add(1, Ordering::Relaxed));
        let entry = QueueEntry {
            operation_id,
            application,
            envelope,
            target,
            queued_at: Instant::now(),
        };
        if let Err(e) = state.queue.push_back(entry) {
            error!(application = %application, "[dispatcher] Queue length exceeded");
            return Err(e);
        }
        state.publish_gauges();
        // The entry may not be runnable yet (per-application cap), but waking
        // the lowest idle worker is enough for it to check.
        Ok((operation_id, state.lowest_idle()))
    }

    fn after_enqueue(&self, operation_id: OperationId, application: ApplicationId, wake: Option<SlotNumber>) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::OPERATIONS_QUEUED.inc();
        info!(operation_id = %operation_id, application = %application, "[dispatcher] Queued");
        if let Some(slot) = wake {
            self.wake(slot);
        }
    }

    // =========================================================================
    // SLOT LIFECYCLE
    // =========================================================================

    /// Claims slot `number` for a freshly authenticated connection.
    pub fn worker_authenticated(&self, number: SlotNumber) -> Result<SlotHandle, DispatchError> {
        let handle = {
            let mut state = self.state.lock();
            let workers = state.slots.len();
            let slot = state
                .slots
                .get_mut(number)
                .ok_or(DispatchError::BadWorkerNumber { number, workers })?;
            if slot.state.is_connected() {
                return Err(DispatchError::AlreadyConnected { slot: number });
            }
            slot.invalidate(SlotState::Authenticated);
            slot.handle()
        };
        info!(slot = number, generation = handle.generation, "[dispatcher] Worker connected");
        Ok(handle)
    }

    /// The worker has been told it is accepted; the slot may now take work.
    pub fn worker_ready(&self, handle: SlotHandle) -> Result<(), DispatchError> {
        let has_work = {
            let mut state = self.state.lock();
            let slot = state.slot_mut(handle)?;
            if slot.state != SlotState::Authenticated {
                return Err(DispatchError::UnexpectedState {
                    slot: handle.number,
                    state: slot.state,
                    expected: "Authenticated",
                });
            }
            slot.set_state(SlotState::Idle);
            !state.queue.is_empty()
        };
        self.capacity_changed.notify_waiters();
        if has_work {
            self.wake(handle.number);
        }
        Ok(())
    }

    /// Takes the next eligible operation for an idle slot.
    ///
    /// Returns `Ok(None)` when nothing is eligible: the queue is empty, every
    /// queued application is at its in-flight cap, or no worker-activity
    /// permit is free.
    pub fn next_work(&self, handle: SlotHandle) -> Result<Option<Assignment>, DispatchError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        {
            let slot = state.slot_mut(handle)?;
            if slot.state != SlotState::Idle || slot.current.is_some() {
                return Err(DispatchError::UnexpectedState {
                    slot: handle.number,
                    state: slot.state,
                    expected: "Idle",
                });
            }
        }
        if state.shut_down || state.queue.is_empty() {
            return Ok(None);
        }

        let permit = match &self.limits {
            Some(limits) => match limits.try_acquire_worker() {
                Some(permit) => Some(permit),
                None => {
                    debug!(slot = handle.number, "[dispatcher] No worker-activity permit free");
                    return Ok(None);
                }
            },
            None => None,
        };

        let max = self.policy.max_ops_per_application;
        let slots = &state.slots;
        let Some(entry) = state
            .queue
            .take_first_eligible(|app| in_flight_for(slots, app) < max)
        else {
            return Ok(None);
        };

        let assignment = Assignment {
            operation_id: entry.operation_id,
            application: entry.application,
            envelope: entry.envelope.clone(),
        };
        let now = Instant::now();
        let slot = &mut state.slots[handle.number];
        slot.current = Some(Assigned {
            entry,
            started_at: now,
            deadline: now + self.policy.operation_timeout,
            timed_out: false,
            permit,
        });
        slot.set_state(SlotState::Busy);
        // Wakes sent while this slot was already signalled were merged into
        // one, so pass the remaining work on to another idle slot.
        let next_idle = if state.queue.is_empty() {
            None
        } else {
            state.lowest_idle()
        };
        state.publish_gauges();
        drop(guard);
        if let Some(idle) = next_idle {
            self.wake(idle);
        }

        info!(
            slot = handle.number,
            operation_id = %assignment.operation_id,
            application = %assignment.application,
            kind = %assignment.envelope.kind,
            "[dispatcher] Next operation for worker"
        );
        Ok(Some(assignment))
    }

    /// Resolves when slot `number` may have new work. A wake delivered while
    /// nobody is waiting is remembered for the next call.
    pub fn work_signal(&self, number: SlotNumber) -> Option<Notified<'_>> {
        self.work_signals.get(number).map(Notify::notified)
    }

    /// The worker never acknowledged the operation: it goes back to the head
    /// of the queue and the slot is failed.
    pub fn return_work(&self, handle: SlotHandle, operation_id: OperationId) -> Result<(), DispatchError> {
        let effects = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let slot = state.slot_mut(handle)?;
            let assigned = take_running(slot, operation_id)?;
            slot.invalidate(SlotState::Failed);
            state.queue.push_front(assigned.entry);
            state.publish_gauges();

            let mut effects = vec![Effect::WorkerFailed(handle.number)];
            if let Some(idle) = state.lowest_idle() {
                effects.push(Effect::Wake(idle));
            }
            effects
        };
        self.stats.requeued.fetch_add(1, Ordering::Relaxed);
        warn!(slot = handle.number, operation_id = %operation_id, "[dispatcher] Worker failed to acknowledge, operation returned to queue");
        self.apply(effects);
        Ok(())
    }

    /// Records a worker's reply.
    ///
    /// A result for an operation that already timed out is discarded. With
    /// `will_exit` the slot moves to STARTING and gets no more work until a
    /// replacement authenticates.
    pub fn finished_work(
        &self,
        handle: SlotHandle,
        operation_id: OperationId,
        result: Result<Vec<u8>, OperationError>,
        will_exit: bool,
    ) -> Result<(), DispatchError> {
        let (assigned, mut effects) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let slot = state.slot_mut(handle)?;
            let assigned = take_running(slot, operation_id)?;

            let mut effects = Vec::new();
            if will_exit {
                slot.invalidate(SlotState::Starting);
                effects.push(Effect::WorkerRecycling(handle.number));
            } else {
                slot.set_state(SlotState::Idle);
            }
            if !state.queue.is_empty() {
                if let Some(idle) = state.lowest_idle() {
                    effects.push(Effect::Wake(idle));
                }
            }
            state.publish_gauges();
            (assigned, effects)
        };

        let elapsed = assigned.started_at.elapsed();
        metrics::OPERATION_DURATION.observe(elapsed.as_secs_f64());
        let Assigned {
            entry,
            timed_out,
            permit,
            ..
        } = assigned;
        // Free the worker-activity permit before any woken slot asks for it.
        drop(permit);

        if timed_out {
            self.stats.stale_results.fetch_add(1, Ordering::Relaxed);
            metrics::STALE_RESULTS.inc();
            warn!(
                slot = handle.number,
                operation_id = %operation_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "[dispatcher] Discarding result of timed-out operation"
            );
        } else {
            info!(
                slot = handle.number,
                operation_id = %operation_id,
                elapsed_ms = elapsed.as_millis() as u64,
                success = result.is_ok(),
                will_exit,
                "[dispatcher] Operation finished"
            );
            effects.insert(
                0,
                Effect::Deliver {
                    target: entry.target,
                    operation_id,
                    outcome: Outcome::from_result(result),
                },
            );
        }

        self.capacity_changed.notify_waiters();
        self.apply(effects);
        Ok(())
    }

    /// The slot's connection ended. Idempotent: a stale handle is ignored.
    ///
    /// An operation still assigned to the slot is reported lost (unless it
    /// already timed out), and the supervisor is told the worker failed.
    pub fn connection_closed(&self, handle: SlotHandle) {
        let effects = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let shut_down = state.shut_down;
            let Ok(slot) = state.slot_mut(handle) else {
                debug!(slot = handle.number, generation = handle.generation, "[dispatcher] No cleanup needed for stale connection");
                return;
            };

            let mut effects = Vec::new();
            match slot.state {
                SlotState::Busy => {
                    if let Some(assigned) = slot.current.take() {
                        if !assigned.timed_out {
                            effects.push(Effect::Deliver {
                                target: assigned.entry.target,
                                operation_id: assigned.entry.operation_id,
                                outcome: Outcome::Lost { slot: handle.number },
                            });
                        }
                    }
                    slot.invalidate(SlotState::Failed);
                }
                SlotState::Authenticated | SlotState::Idle => {
                    slot.invalidate(SlotState::Failed);
                }
                SlotState::Starting | SlotState::Failed => return,
            }
            // After shutdown nothing is replaced.
            if !shut_down {
                effects.push(Effect::WorkerFailed(handle.number));
            }
            state.publish_gauges();
            effects
        };

        warn!(slot = handle.number, "[dispatcher] Worker connection lost");
        self.capacity_changed.notify_waiters();
        self.apply(effects);
    }

    // =========================================================================
    // TIMEOUTS
    // =========================================================================

    /// Reports `TimedOut` for every assignment past its deadline.
    ///
    /// The slot stays BUSY: the worker is still running the operation, and
    /// its eventual reply frees the slot.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let after = self.policy.operation_timeout;
        let effects: Vec<Effect> = {
            let mut state = self.state.lock();
            state
                .slots
                .iter_mut()
                .filter_map(|slot| {
                    let assigned = slot.current.as_mut()?;
                    if assigned.timed_out || assigned.deadline > now {
                        return None;
                    }
                    assigned.timed_out = true;
                    warn!(slot = slot.number, operation_id = %assigned.entry.operation_id, "[dispatcher] Operation timed out");
                    Some(Effect::Deliver {
                        target: Arc::clone(&assigned.entry.target),
                        operation_id: assigned.entry.operation_id,
                        outcome: Outcome::TimedOut { after },
                    })
                })
                .collect()
        };
        let expired = effects.len();
        self.apply(effects);
        expired
    }

    /// Checks deadlines every `timeout_check_interval` until `shutdown` is set.
    pub fn spawn_timeout_monitor(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dispatcher.policy.timeout_check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        dispatcher.expire_overdue();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("[dispatcher] Timeout monitor stopped");
        })
    }

    // =========================================================================
    // HEALTH & SHUTDOWN
    // =========================================================================

    /// Slots that have been FAILED for at least `grace`.
    pub fn failed_slots_beyond(&self, grace: Duration) -> Vec<SlotNumber> {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Failed && s.state_since.elapsed() >= grace)
            .map(|s| s.number)
            .collect()
    }

    pub fn slots(&self) -> Vec<SlotSnapshot> {
        self.state.lock().slots.iter().map(WorkerSlot::snapshot).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Refuses new submissions and fails every queued operation with
    /// [`OperationError::DispatcherShutdown`]. Returns how many were drained.
    pub fn shutdown(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            state.shut_down = true;
            let drained = state.queue.drain();
            state.publish_gauges();
            drained
        };
        let count = drained.len();
        let effects = drained
            .into_iter()
            .map(|entry| Effect::Deliver {
                target: entry.target,
                operation_id: entry.operation_id,
                outcome: Outcome::Failed(OperationError::DispatcherShutdown),
            })
            .collect();
        info!(drained = count, "[dispatcher] Shut down");
        self.apply(effects);
        self.capacity_changed.notify_waiters();
        for signal in &self.work_signals {
            signal.notify_one();
        }
        count
    }

    // =========================================================================
    // EFFECTS
    // =========================================================================

    fn wake(&self, slot: SlotNumber) {
        if let Some(signal) = self.work_signals.get(slot) {
            signal.notify_one();
        }
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Deliver {
                    target,
                    operation_id,
                    outcome,
                } => {
                    let kind = outcome.kind();
                    self.stats.record(kind);
                    metrics::OPERATION_OUTCOMES
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    debug!(operation_id = %operation_id, outcome = kind.as_str(), "[dispatcher] Delivering outcome");
                    target.notify(outcome);
                }
                Effect::WorkerFailed(slot) => {
                    metrics::WORKER_RESTARTS.with_label_values(&["failed"]).inc();
                    match self.supervisor() {
                        Some(supervisor) => supervisor.worker_failed(slot),
                        None => warn!(slot, "[dispatcher] Worker failed but no supervisor installed"),
                    }
                }
                Effect::WorkerRecycling(slot) => {
                    metrics::WORKER_RESTARTS.with_label_values(&["recycled"]).inc();
                    match self.supervisor() {
                        Some(supervisor) => supervisor.worker_recycling(slot),
                        None => warn!(slot, "[dispatcher] Worker recycling but no supervisor installed"),
                    }
                }
                Effect::Wake(slot) => self.wake(slot),
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
