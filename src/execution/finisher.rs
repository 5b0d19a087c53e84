//! Terminal action of one execution
//!
//! Whoever ends an execution (timer, power drop, user abort) goes through the
//! same finisher. It runs its terminal action at most once to completion; a
//! failed run leaves the execution tracked so it can be retried.

use super::error::ExecutionError;
use super::manager::ManagerInner;
use crate::devices::PowerState;
use crate::model::Execution;
use appliance_shared::{ExecutionLifecycle, ExecutionState, LifecycleEvent, TransitionResult};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishMode {
    Completed,
    Aborted,
}

struct FinisherState {
    lifecycle: ExecutionLifecycle,
    executed: bool,
    /// Record returned by the store once the stop was recorded
    stopped: Option<Execution>,
    device_released: bool,
}

pub(crate) struct ExecutionFinisher {
    execution: Execution,
    state: AsyncMutex<FinisherState>,
    auto_stop: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionFinisher {
    pub(crate) fn new(execution: Execution) -> Self {
        Self {
            execution,
            state: AsyncMutex::new(FinisherState {
                lifecycle: ExecutionLifecycle::new(),
                executed: false,
                stopped: None,
                device_released: false,
            }),
            auto_stop: Mutex::new(None),
        }
    }

    pub(crate) fn execution(&self) -> &Execution {
        &self.execution
    }

    pub(crate) fn set_auto_stop(&self, handle: JoinHandle<()>) {
        let previous = self
            .auto_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(crate) fn cancel_auto_stop(&self) {
        let handle = self
            .auto_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Run the terminal action unless it already ran. The caller holds the
    /// device lock.
    pub(crate) async fn finish(&self, manager: &ManagerInner, mode: FinishMode) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        if state.executed {
            debug!(
                "[{}] Execution {} already finished",
                self.execution.device.name, self.execution.id
            );
            return Ok(());
        }

        let event = match mode {
            FinishMode::Completed => LifecycleEvent::Completed,
            FinishMode::Aborted => LifecycleEvent::AbortRequested,
        };
        if let TransitionResult::Invalid { from, event } = state.lifecycle.process_event(event) {
            debug!(
                "[{}] Ignoring {:?} in state {:?}",
                self.execution.device.name, event, from
            );
        }

        self.terminal_action(manager, &mut state).await
    }

    /// Run the terminal action again after a failure
    pub(crate) async fn retry(&self, manager: &ManagerInner) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        if state.executed {
            return Ok(());
        }
        if state.lifecycle.state() == ExecutionState::Running {
            state.lifecycle.process_event(LifecycleEvent::Completed);
        }

        self.terminal_action(manager, &mut state).await
    }

    async fn terminal_action(
        &self,
        manager: &ManagerInner,
        state: &mut FinisherState,
    ) -> Result<(), ExecutionError> {
        match self.run_steps(manager, state).await {
            Ok(()) => {
                state.lifecycle.process_event(LifecycleEvent::TerminalActionSucceeded);
                Ok(())
            }
            Err(e) => {
                state.lifecycle.process_event(LifecycleEvent::TerminalActionFailed);
                error!(
                    "[{}] Could not finish execution {}: {}",
                    self.execution.device.name, self.execution.id, e
                );
                manager.report_failure(&self.execution, &e);
                Err(e)
            }
        }
    }

    async fn run_steps(&self, manager: &ManagerInner, state: &mut FinisherState) -> Result<(), ExecutionError> {
        let execution = &self.execution;
        let device = &execution.device;
        let aborted = state.lifecycle.is_aborted();

        info!("[{}] Stopping execution {}", device.name, execution.id);
        info!("[{}] User: {}", device.name, execution.user.name);
        info!("[{}] Program: {}", device.name, execution.program.name);
        info!("[{}] Time: {}s", device.name, execution.elapsed().as_secs());

        self.cancel_auto_stop();
        manager.cancel_planned_stop(execution.id);

        manager
            .power
            .set_device_power_state(device, PowerState::Off)
            .await?;
        debug!("[{}] Power disabled", device.name);

        let stopped = match state.stopped.clone() {
            Some(stopped) => stopped,
            None => {
                let stopped = manager.store.stop_execution(execution).await?;
                state.stopped = Some(stopped.clone());
                stopped
            }
        };
        if !state.device_released {
            manager.store.execution_ended_on_device(device).await;
            state.device_released = true;
        }

        manager.store.pay_execution(&stopped).await?;
        debug!("[{}] Execution {} paid", device.name, execution.id);

        state.executed = true;
        manager.release(execution.id);
        manager.finished(stopped, aborted);

        info!("[{}] Execution {} finished", device.name, execution.id);
        Ok(())
    }
}
