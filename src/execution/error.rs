use crate::devices::PowerError;
use crate::model::ExecutionId;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Execution {0} is not running")]
    NotRunning(ExecutionId),

    #[error("Execution {0} is already running")]
    AlreadyRunning(ExecutionId),

    #[error("Could not switch device: {0}")]
    Power(#[from] PowerError),

    #[error("Store update failed: {0}")]
    Store(#[from] StoreError),
}
