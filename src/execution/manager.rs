//! Execution engine
//!
//! Starts executions, ends them when their time is up, when the power draw
//! says the program is done, or when a user aborts them, and switches off
//! devices that were powered on without an execution.
//!
//! Every operation touching a device runs under that device's lock. The
//! finisher's own lock is only ever taken inside it. Power readings are
//! queued per device and applied in arrival order.

use super::error::ExecutionError;
use super::finisher::{ExecutionFinisher, FinishMode};
use super::locks::DeviceLocks;
use super::registry::ExecutionRegistry;
use crate::config::ExecutionConfig;
use crate::devices::{DevicePowerManager, PowerState};
use crate::model::{DeviceId, Execution, ExecutionId};
use crate::notify::{NotificationDispatcher, NotificationMessage};
use crate::scheduler::Scheduler;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle notifications for observers such as a UI
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Started(Execution),
    Finished(Execution),
    /// The terminal action failed; the execution stays tracked
    Failed { execution: Execution, reason: String },
}

type Reading = (Execution, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    Fresh,
    Resume,
}

pub(crate) struct ManagerInner {
    pub(super) power: Arc<dyn DevicePowerManager>,
    pub(super) store: Arc<dyn Store>,
    notifications: Arc<NotificationDispatcher>,
    registry: Arc<ExecutionRegistry>,
    locks: DeviceLocks,
    planned_stops: Mutex<HashMap<ExecutionId, JoinHandle<()>>>,
    readings: Mutex<HashMap<DeviceId, mpsc::UnboundedSender<Reading>>>,
    events: broadcast::Sender<ExecutionEvent>,
    scheduler: Scheduler,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    config: ExecutionConfig,
}

pub struct ExecutionManager {
    inner: Arc<ManagerInner>,
}

impl ExecutionManager {
    pub fn new(
        power: Arc<dyn DevicePowerManager>,
        store: Arc<dyn Store>,
        notifications: Arc<NotificationDispatcher>,
        registry: Arc<ExecutionRegistry>,
        config: ExecutionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let inner = Arc::new(ManagerInner {
            power,
            store,
            notifications,
            registry,
            locks: DeviceLocks::default(),
            planned_stops: Mutex::new(HashMap::new()),
            readings: Mutex::new(HashMap::new()),
            events,
            scheduler: Scheduler::new(config.workers),
            watchdog: Mutex::new(None),
            config,
        });

        let weak = Arc::downgrade(&inner);
        inner
            .power
            .add_power_measurement_listener(Arc::new(move |execution: &Execution, watts| {
                if let Some(inner) = weak.upgrade() {
                    inner.queue_reading(execution, watts);
                }
            }));

        Self { inner }
    }

    /// Start checking for devices powered on without an execution
    pub fn start_watchdog(&self) {
        let mut watchdog = self
            .inner
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if watchdog.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let interval = self.inner.config.watchdog_interval;
        info!("Watchdog checking devices every {}s", interval.as_secs());
        *watchdog = Some(self.inner.scheduler.every(interval, move || {
            let inner = inner.clone();
            async move { inner.check_unsupervised_devices().await }
        }));
    }

    /// Record the start, power the device on and supervise the execution
    pub async fn start_execution(&self, execution: &Execution) -> Result<Execution, ExecutionError> {
        self.inner.start(execution, StartMode::Fresh).await
    }

    /// End a running execution on behalf of its user
    pub async fn abort_execution(&self, execution: &Execution) -> Result<(), ExecutionError> {
        let finisher = self
            .inner
            .registry
            .get(execution.id)
            .ok_or(ExecutionError::NotRunning(execution.id))?;

        info!("[{}] Aborting execution {}", execution.device.name, execution.id);
        let _device = self.inner.locks.acquire(finisher.execution().device.id).await;
        finisher.finish(&self.inner, FinishMode::Aborted).await
    }

    /// Run the terminal action of an execution whose finish failed before
    pub async fn retry_finish_execution(&self, execution: &Execution) -> Result<(), ExecutionError> {
        let finisher = self
            .inner
            .registry
            .get(execution.id)
            .ok_or(ExecutionError::NotRunning(execution.id))?;

        info!("[{}] Retrying finish of execution {}", execution.device.name, execution.id);
        let _device = self.inner.locks.acquire(finisher.execution().device.id).await;
        finisher.retry(&self.inner).await
    }

    /// Feed a power reading of a running execution's device
    pub async fn on_power_measurement_available(&self, execution: &Execution, watts: f64) {
        self.inner.on_power_measurement(execution, watts).await;
    }

    /// Switch off every device that is on without a running execution
    pub async fn check_unsupervised_devices(&self) {
        self.inner.check_unsupervised_devices().await;
    }

    /// Pick up executions that were running when the controller stopped.
    /// Returns how many were resumed.
    pub async fn resume_running_executions(&self) -> usize {
        let devices = match self.inner.store.managed_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Could not load devices to resume executions: {}", e);
                return 0;
            }
        };

        let mut resumed = 0;
        for device in devices {
            let execution = match self.inner.store.running_execution(device.id).await {
                Ok(Some(execution)) => execution,
                Ok(None) => continue,
                Err(e) => {
                    error!("[{}] Could not load running execution: {}", device.name, e);
                    continue;
                }
            };

            info!("[{}] Resuming execution {}", device.name, execution.id);
            match self.inner.start(&execution, StartMode::Resume).await {
                Ok(_) => resumed += 1,
                Err(e) => error!("[{}] Could not resume execution {}: {}", device.name, execution.id, e),
            }
        }
        resumed
    }

    pub fn running_executions(&self) -> Vec<Execution> {
        self.inner.registry.running_executions()
    }

    pub fn running_execution(&self, device: DeviceId) -> Option<Execution> {
        self.inner.registry.running_execution(device)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.events.subscribe()
    }

    /// Stop timers and the watchdog. Terminal actions already running complete.
    pub fn shutdown(&self) {
        debug!("Shutting down execution manager");
        self.inner.scheduler.shutdown();

        if let Some(watchdog) = self
            .inner
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watchdog.abort();
        }

        let planned: Vec<JoinHandle<()>> = self
            .inner
            .planned_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in planned {
            handle.abort();
        }

        for finisher in self.inner.registry.finishers() {
            finisher.cancel_auto_stop();
        }

        // Reading queues drain what they hold, then stop
        self.inner
            .readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ManagerInner {
    async fn start(self: &Arc<Self>, execution: &Execution, mode: StartMode) -> Result<Execution, ExecutionError> {
        let device = &execution.device;
        let _device = self.locks.acquire(device.id).await;

        if self.registry.contains(execution.id) {
            warn!("[{}] Execution {} is already running", device.name, execution.id);
            return Err(ExecutionError::AlreadyRunning(execution.id));
        }

        info!("[{}] Starting execution {}", device.name, execution.id);
        let started = match mode {
            StartMode::Fresh => {
                let started = self.store.start_execution(execution).await?;
                debug!("[{}] Start recorded", device.name);
                started
            }
            StartMode::Resume => execution.clone(),
        };

        if let Err(e) = self.power.set_device_power_state(device, PowerState::On).await {
            error!("[{}] Could not power on: {}", device.name, e);
            if mode == StartMode::Fresh {
                if let Err(reset) = self.store.reset_execution(&started).await {
                    error!("[{}] Could not reset execution {}: {}", device.name, started.id, reset);
                }
            }
            return Err(e.into());
        }
        debug!("[{}] Power enabled", device.name);

        self.store.execution_started_on_device(device, &started).await;

        let finisher = Arc::new(ExecutionFinisher::new(started.clone()));
        self.registry.insert(finisher.clone());

        let remaining = started.remaining();
        finisher.set_auto_stop(self.schedule_finish(&started, remaining));
        debug!("[{}] Program ends in {}s", device.name, remaining.as_secs());

        // A low draw right after start still arms auto-end
        self.evaluate_power(&started, 0.0);

        self.publish(ExecutionEvent::Started(started.clone()));
        Ok(started)
    }

    fn schedule_finish(self: &Arc<Self>, execution: &Execution, delay: Duration) -> JoinHandle<()> {
        self.schedule_locked(execution, delay, move |inner, id, device| async move {
            inner.finish_by_timer(id, device).await;
        })
    }

    /// Schedule work that runs under the execution's device lock, taken
    /// before a worker.
    fn schedule_locked<F, Fut>(
        self: &Arc<Self>,
        execution: &Execution,
        delay: Duration,
        work: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Arc<Self>, ExecutionId, OwnedMutexGuard<()>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let locking = self.clone();
        let inner = self.clone();
        let id = execution.id;
        let device = execution.device.id;
        self.scheduler.schedule_admitted(
            delay,
            async move { locking.locks.acquire(device).await },
            move |guard| work(inner, id, guard),
        )
    }

    async fn finish_by_timer(&self, id: ExecutionId, _device: OwnedMutexGuard<()>) {
        let Some(finisher) = self.registry.get(id) else {
            trace!("Execution {} already finished", id);
            return;
        };
        if let Err(e) = finisher.finish(self, FinishMode::Completed).await {
            debug!("Timed finish of execution {} failed: {}", id, e);
        }
    }

    /// Hand a reading to its device's queue without waiting
    fn queue_reading(self: &Arc<Self>, execution: &Execution, watts: f64) {
        if !execution.program.auto_end || self.scheduler.is_shut_down() {
            return;
        }

        let mut queues = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reading = (execution.clone(), watts);
        if let Some(queue) = queues.get(&execution.device.id) {
            match queue.send(reading) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => reading = returned,
            }
        }

        trace!("[{}] Opening reading queue", execution.device.name);
        let (queue, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the task below ends
        let _ = queue.send(reading);
        queues.insert(execution.device.id, queue);
        tokio::spawn(apply_readings(Arc::downgrade(self), rx));
    }

    async fn on_power_measurement(self: &Arc<Self>, execution: &Execution, watts: f64) {
        if !execution.program.auto_end {
            return;
        }

        let _device = self.locks.acquire(execution.device.id).await;
        let Some(_worker) = self.scheduler.worker().await else {
            return;
        };
        if !self.registry.contains(execution.id) {
            trace!("[{}] Reading for finished execution {}", execution.device.name, execution.id);
            return;
        }
        self.evaluate_power(execution, watts);
    }

    /// Arm or disarm the auto-end timer. The caller holds the device lock.
    fn evaluate_power(self: &Arc<Self>, execution: &Execution, watts: f64) {
        if !execution.program.auto_end {
            return;
        }
        let device = &execution.device;
        let mut planned = self
            .planned_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if watts < device.auto_end_power_threshold {
            let pending = planned
                .get(&execution.id)
                .is_some_and(|handle| !handle.is_finished());
            if pending {
                return;
            }

            debug!(
                "[{}] Power {}W below {}W, ending program in {}s",
                device.name,
                watts,
                device.auto_end_power_threshold,
                device.auto_end_wait.as_secs()
            );
            let name = device.name.clone();
            let handle = self.schedule_locked(
                execution,
                device.auto_end_wait,
                move |inner, id, device| async move {
                    info!("[{}] Power draw indicates the program has ended", name);
                    inner.release_planned_stop(id);
                    inner.finish_by_timer(id, device).await;
                },
            );
            planned.insert(execution.id, handle);
        } else if let Some(handle) = planned.remove(&execution.id) {
            debug!("[{}] Power back at {}W, auto-end cancelled", device.name, watts);
            handle.abort();
        }
    }

    async fn check_unsupervised_devices(&self) {
        let devices = match self.store.managed_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Watchdog could not load devices: {}", e);
                return;
            }
        };

        for device in devices {
            let _device = self.locks.acquire(device.id).await;
            if self.registry.running_execution(device.id).is_some() {
                continue;
            }
            let Some(_worker) = self.scheduler.worker().await else {
                return;
            };

            match self.power.get_state(&device).await {
                Ok(PowerState::On) => {
                    warn!(
                        "[{}] Device is powered on without a running execution, switching it off",
                        device.name
                    );
                    if let Err(e) = self.power.set_device_power_state(&device, PowerState::Off).await {
                        error!("[{}] Could not switch off: {}", device.name, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("[{}] Could not read power state: {}", device.name, e),
            }
        }
    }

    pub(super) fn cancel_planned_stop(&self, id: ExecutionId) {
        if let Some(handle) = self
            .planned_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            handle.abort();
        }
    }

    fn release_planned_stop(&self, id: ExecutionId) {
        self.planned_stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Forget a finished execution
    pub(super) fn release(&self, id: ExecutionId) {
        self.registry.remove(id);
        self.release_planned_stop(id);
    }

    /// Announce a finished execution and notify its user in the background
    pub(super) fn finished(&self, execution: Execution, aborted: bool) {
        self.publish(ExecutionEvent::Finished(execution.clone()));

        let dispatcher = self.notifications.clone();
        tokio::spawn(async move {
            let message = NotificationMessage::for_execution(&execution, aborted);
            dispatcher.dispatch(&execution.user, &message).await;
        });
    }

    pub(super) fn report_failure(&self, execution: &Execution, error: &ExecutionError) {
        self.publish(ExecutionEvent::Failed {
            execution: execution.clone(),
            reason: error.to_string(),
        });
    }

    fn publish(&self, event: ExecutionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Apply one device's readings in the order they arrived
async fn apply_readings(inner: Weak<ManagerInner>, mut readings: mpsc::UnboundedReceiver<Reading>) {
    while let Some((execution, watts)) = readings.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_power_measurement(&execution, watts).await;
    }
}
