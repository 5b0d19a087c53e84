//! Power control abstraction used by the execution engine

use super::registration::RegistrationError;
use crate::gateway::GatewayError;
use crate::model::{Device, Execution};
use crate::store::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Observed or requested power state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    /// Switching on has been requested
    SetOn,
    /// Switching off has been requested
    SetOff,
    Unknown,
}

impl PowerState {
    /// Relay position this state asks for; `None` for `Unknown`
    pub fn target(self) -> Option<bool> {
        match self {
            PowerState::On | PowerState::SetOn => Some(true),
            PowerState::Off | PowerState::SetOff => Some(false),
            PowerState::Unknown => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Device {0} is not paired with an outlet")]
    NotRegistered(String),

    #[error("Cannot switch a device to {0:?}")]
    InvalidTarget(PowerState),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Receives power readings of devices with a running execution
pub type PowerMeasurementListener = Arc<dyn Fn(&Execution, f64) + Send + Sync>;

#[async_trait]
pub trait DevicePowerManager: Send + Sync {
    /// Switch a device and wait until the switch is confirmed
    async fn set_device_power_state(&self, device: &Device, state: PowerState) -> Result<(), PowerError>;

    /// Current state; `Unknown` when unpaired or unreachable
    async fn get_state(&self, device: &Device) -> Result<PowerState, PowerError>;

    fn add_power_measurement_listener(&self, listener: PowerMeasurementListener);

    fn is_device_registered(&self, device: &Device) -> bool;

    /// Pair a new outlet with `device`. Returns false if none joined in time.
    async fn register_device(&self, device: &Device) -> Result<bool, PowerError>;

    async fn shutdown(&self);
}
