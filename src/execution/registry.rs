use super::finisher::ExecutionFinisher;
use crate::model::{DeviceId, Execution, ExecutionId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Finishers of every execution the controller currently supervises
#[derive(Default)]
pub struct ExecutionRegistry {
    finishers: RwLock<HashMap<ExecutionId, Arc<ExecutionFinisher>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a finisher. Returns false if its execution is already tracked.
    pub(crate) fn insert(&self, finisher: Arc<ExecutionFinisher>) -> bool {
        let mut finishers = self.finishers.write().unwrap_or_else(PoisonError::into_inner);
        let id = finisher.execution().id;
        if finishers.contains_key(&id) {
            return false;
        }
        finishers.insert(id, finisher);
        true
    }

    pub(crate) fn get(&self, id: ExecutionId) -> Option<Arc<ExecutionFinisher>> {
        self.finishers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub(crate) fn remove(&self, id: ExecutionId) -> Option<Arc<ExecutionFinisher>> {
        self.finishers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub(crate) fn finishers(&self) -> Vec<Arc<ExecutionFinisher>> {
        self.finishers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.finishers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn running_executions(&self) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .finishers()
            .iter()
            .map(|f| f.execution().clone())
            .collect();
        executions.sort_by_key(|e| e.id);
        executions
    }

    pub fn running_execution(&self, device: DeviceId) -> Option<Execution> {
        self.find(|e| e.device.id == device)
    }

    /// Execution whose outlet owns the sensor `sensor_id`.
    ///
    /// Sensors of an outlet carry the outlet's id followed by a `-` suffix.
    pub fn find_by_sensor(&self, sensor_id: &str) -> Option<Execution> {
        self.find(|e| {
            e.device.endpoint().is_some_and(|endpoint| {
                sensor_id == endpoint
                    || sensor_id
                        .strip_prefix(endpoint)
                        .is_some_and(|rest| rest.starts_with('-'))
            })
        })
    }

    fn find<P>(&self, predicate: P) -> Option<Execution>
    where
        P: Fn(&Execution) -> bool,
    {
        self.finishers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|f| f.execution())
            .find(|e| predicate(e))
            .cloned()
    }
}
