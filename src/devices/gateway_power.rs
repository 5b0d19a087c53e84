//! [`DevicePowerManager`] backed by the home-automation gateway

use super::control::DeviceControlService;
use super::power::{DevicePowerManager, PowerError, PowerMeasurementListener, PowerState};
use super::registration::DeviceRegistrationService;
use crate::config::GatewayConfig;
use crate::execution::ExecutionRegistry;
use crate::gateway::{ApiClient, EventStreamClient};
use crate::model::Device;
use crate::store::Store;
use appliance_shared::{EventKind, GatewayEvent};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, trace, warn};

type Listeners = Arc<RwLock<Vec<PowerMeasurementListener>>>;

pub struct GatewayPowerManager {
    control: DeviceControlService,
    registration: DeviceRegistrationService,
    stream: Arc<EventStreamClient>,
    store: Arc<dyn Store>,
    listeners: Listeners,
}

impl GatewayPowerManager {
    /// Wire the gateway services together. Power readings are attributed to
    /// executions tracked in `registry`.
    pub fn new(
        api: Arc<ApiClient>,
        stream: Arc<EventStreamClient>,
        store: Arc<dyn Store>,
        registry: Arc<ExecutionRegistry>,
        config: &GatewayConfig,
    ) -> Self {
        let control = DeviceControlService::new(api.clone(), &stream, config.confirmation_timeout);
        let registration = DeviceRegistrationService::new(api, &stream, config.pairing_window_secs);
        let listeners: Listeners = Arc::default();

        let targets = listeners.clone();
        stream.subscribe(EventKind::PowerMeasured, move |event| {
            if let GatewayEvent::PowerMeasured { unique_id, watts } = event {
                route_measurement(&registry, &targets, unique_id, *watts);
            }
        });

        Self {
            control,
            registration,
            stream,
            store,
            listeners,
        }
    }
}

fn route_measurement(registry: &ExecutionRegistry, listeners: &Listeners, sensor_id: &str, watts: f64) {
    let Some(execution) = registry.find_by_sensor(sensor_id) else {
        trace!("No running execution for sensor {}", sensor_id);
        return;
    };

    trace!("[{}] Power: {}W", execution.device.name, watts);
    let listeners = listeners
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for listener in listeners {
        listener(&execution, watts);
    }
}

#[async_trait]
impl DevicePowerManager for GatewayPowerManager {
    async fn set_device_power_state(&self, device: &Device, state: PowerState) -> Result<(), PowerError> {
        let on = state.target().ok_or(PowerError::InvalidTarget(state))?;
        let endpoint = device
            .endpoint()
            .ok_or_else(|| PowerError::NotRegistered(device.name.clone()))?;

        debug!("[{}] Switching outlet {} on={}", device.name, endpoint, on);
        self.control.set_state(endpoint, on).await?;
        Ok(())
    }

    async fn get_state(&self, device: &Device) -> Result<PowerState, PowerError> {
        let Some(endpoint) = device.endpoint() else {
            return Ok(PowerState::Unknown);
        };

        let state = self.control.get_state(endpoint).await?;
        Ok(match (state.reachable, state.on) {
            (false, _) => PowerState::Unknown,
            (true, true) => PowerState::On,
            (true, false) => PowerState::Off,
        })
    }

    fn add_power_measurement_listener(&self, listener: PowerMeasurementListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn is_device_registered(&self, device: &Device) -> bool {
        device.endpoint().is_some()
    }

    async fn register_device(&self, device: &Device) -> Result<bool, PowerError> {
        info!("[{}] Pairing a new outlet", device.name);
        match self.registration.scan_for_new_device().await? {
            Some(endpoint) => {
                self.store.rebind_endpoint(device.id, &endpoint).await?;
                info!("[{}] Paired with outlet {}", device.name, endpoint);
                Ok(true)
            }
            None => {
                warn!("[{}] No outlet found", device.name);
                Ok(false)
            }
        }
    }

    async fn shutdown(&self) {
        debug!("Shutting down gateway power manager");
        self.stream.stop().await;
    }
}
