//! Device power control
//!
//! The execution engine only sees [`DevicePowerManager`]. The gateway-backed
//! implementation combines:
//! - `control`: reading and switching outlets with push confirmation
//! - `registration`: pairing new outlets
//! - routing of power readings to running executions

mod control;
mod gateway_power;
mod power;
mod registration;

pub use control::{DeviceControlService, DeviceState};
pub use gateway_power::GatewayPowerManager;
pub use power::{DevicePowerManager, PowerError, PowerMeasurementListener, PowerState};
pub use registration::{DeviceRegistrationService, RegistrationError};
