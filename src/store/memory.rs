use super::{Store, StoreError};
use crate::model::{Device, DeviceId, Execution, ExecutionId};
use appliance_shared::now_ms;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    devices: BTreeMap<DeviceId, Device>,
    executions: BTreeMap<ExecutionId, Execution>,
    payments: Vec<ExecutionId>,
    current: HashMap<DeviceId, ExecutionId>,
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_device(&self, device: Device) {
        self.state.write().await.devices.insert(device.id, device);
    }

    pub async fn insert_execution(&self, execution: Execution) {
        let mut state = self.state.write().await;
        state
            .devices
            .entry(execution.device.id)
            .or_insert_with(|| execution.device.clone());
        state.executions.insert(execution.id, execution);
    }

    pub async fn device(&self, id: DeviceId) -> Option<Device> {
        self.state.read().await.devices.get(&id).cloned()
    }

    pub async fn execution(&self, id: ExecutionId) -> Option<Execution> {
        self.state.read().await.executions.get(&id).cloned()
    }

    /// Executions charged so far, in order
    pub async fn payments(&self) -> Vec<ExecutionId> {
        self.state.read().await.payments.clone()
    }

    /// Execution the device was last told about
    pub async fn current_execution(&self, device: DeviceId) -> Option<ExecutionId> {
        self.state.read().await.current.get(&device).copied()
    }
}

fn not_found(id: ExecutionId) -> StoreError {
    StoreError::NotFound {
        entity: "execution",
        id,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn managed_devices(&self) -> Result<Vec<Device>, StoreError> {
        let state = self.state.read().await;
        Ok(state.devices.values().filter(|d| d.enabled).cloned().collect())
    }

    async fn running_execution(&self, device: DeviceId) -> Result<Option<Execution>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .values()
            .find(|e| e.device.id == device && e.is_running())
            .cloned())
    }

    async fn start_execution(&self, execution: &Execution) -> Result<Execution, StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .executions
            .entry(execution.id)
            .or_insert_with(|| execution.clone());
        if record.started_at_ms.is_none() {
            record.started_at_ms = Some(now_ms());
        }
        record.stopped_at_ms = None;
        Ok(record.clone())
    }

    async fn reset_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| not_found(execution.id))?;
        record.started_at_ms = None;
        record.stopped_at_ms = None;
        Ok(())
    }

    async fn stop_execution(&self, execution: &Execution) -> Result<Execution, StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| not_found(execution.id))?;
        if record.stopped_at_ms.is_none() {
            record.stopped_at_ms = Some(now_ms());
        }
        Ok(record.clone())
    }

    async fn pay_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.executions.contains_key(&execution.id) {
            return Err(not_found(execution.id));
        }
        state.payments.push(execution.id);
        Ok(())
    }

    async fn execution_started_on_device(&self, device: &Device, execution: &Execution) {
        debug!("[{}] Now running execution {}", device.name, execution.id);
        self.state
            .write()
            .await
            .current
            .insert(device.id, execution.id);
    }

    async fn execution_ended_on_device(&self, device: &Device) {
        debug!("[{}] No execution running", device.name);
        self.state.write().await.current.remove(&device.id);
    }

    async fn rebind_endpoint(&self, device: DeviceId, endpoint_id: &str) -> Result<Device, StoreError> {
        let mut state = self.state.write().await;
        let record = state.devices.get_mut(&device).ok_or(StoreError::NotFound {
            entity: "device",
            id: u64::from(device),
        })?;
        record.endpoint_id = Some(endpoint_id.to_string());
        let updated = record.clone();

        for execution in state.executions.values_mut() {
            if execution.device.id == device {
                execution.device.endpoint_id = Some(endpoint_id.to_string());
            }
        }
        Ok(updated)
    }
}
