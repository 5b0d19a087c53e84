use crate::model::DeviceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per device, created on first use
#[derive(Default)]
pub(crate) struct DeviceLocks {
    locks: Mutex<HashMap<DeviceId, Arc<AsyncMutex<()>>>>,
}

impl DeviceLocks {
    pub(crate) async fn acquire(&self, device: DeviceId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device)
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}
