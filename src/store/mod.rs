//! Persistence collaborator
//!
//! The controller reads device and execution records through [`Store`] and
//! asks it to apply state changes. The in-memory implementation backs the
//! daemon and the tests.

mod memory;

pub use memory::MemoryStore;

use crate::model::{Device, DeviceId, Execution};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Store backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Devices the controller supervises
    async fn managed_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// The execution currently running on a device, if any
    async fn running_execution(&self, device: DeviceId) -> Result<Option<Execution>, StoreError>;

    /// Record the start of an execution and return the updated record
    async fn start_execution(&self, execution: &Execution) -> Result<Execution, StoreError>;

    /// Undo `start_execution` after the device could not be powered on
    async fn reset_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Record the end of an execution and return the updated record
    async fn stop_execution(&self, execution: &Execution) -> Result<Execution, StoreError>;

    /// Charge the user for a stopped execution
    async fn pay_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn execution_started_on_device(&self, device: &Device, execution: &Execution);

    async fn execution_ended_on_device(&self, device: &Device);

    /// Bind a newly paired outlet to a device record
    async fn rebind_endpoint(&self, device: DeviceId, endpoint_id: &str) -> Result<Device, StoreError>;
}
