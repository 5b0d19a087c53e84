//! Fakes shared by the unit tests

use crate::config::GatewayConfig;
use crate::devices::{DevicePowerManager, PowerError, PowerMeasurementListener, PowerState};
use crate::gateway::{
    ApiClient, GatewayRequest, GatewayResponse, GatewayTransport, HttpMethod, PushConnection,
    PushConnector, StreamError, TransportError,
};
use crate::model::{Device, DeviceId, Execution, ExecutionId, Program, User};
use crate::notify::{NotificationMessage, Notifier, NotifyError};
use crate::store::{MemoryStore, Store, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub(crate) fn sample_execution(id: ExecutionId, device_id: DeviceId, endpoint: Option<&str>) -> Execution {
    Execution {
        id,
        device: Device {
            id: device_id,
            name: format!("Washer {}", device_id),
            location: "Basement".into(),
            endpoint_id: endpoint.map(String::from),
            auto_end_power_threshold: 5.0,
            auto_end_wait: Duration::from_secs(60),
            enabled: true,
        },
        user: User {
            id: 1,
            name: "Alice".into(),
            email: Some("alice@example.org".into()),
            email_notification: false,
            pushover_user_key: None,
            push_id: Some("push-alice".into()),
            push_enabled: true,
        },
        program: Program {
            id: 1,
            name: "Cotton 60".into(),
            duration: Duration::from_secs(2 * 3600),
            auto_end: false,
        },
        started_at_ms: None,
        stopped_at_ms: None,
    }
}

pub(crate) fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        username: "admin".into(),
        password: "secret".into(),
        ..GatewayConfig::default()
    }
}

pub(crate) fn api_client(transport: &Arc<FakeTransport>) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(transport.clone(), &gateway_config()))
}

// ---------------------------------------------------------------------------
// Gateway HTTP
// ---------------------------------------------------------------------------

type SwitchHook = Arc<dyn Fn(&str, bool) + Send + Sync>;

#[derive(Clone, Copy)]
struct FakeLight {
    on: bool,
    reachable: bool,
}

/// Scripted gateway. Requests without a scripted answer are served from a
/// small model of lights and configuration.
pub(crate) struct FakeTransport {
    requests: Mutex<Vec<GatewayRequest>>,
    script: Mutex<VecDeque<Result<GatewayResponse, TransportError>>>,
    auth_response: Mutex<GatewayResponse>,
    lights: Mutex<HashMap<String, FakeLight>>,
    on_switch: Mutex<Option<SwitchHook>>,
}

fn ok(body: impl Into<String>) -> GatewayResponse {
    GatewayResponse {
        status: 200,
        body: body.into(),
    }
}

fn not_found() -> GatewayResponse {
    GatewayResponse {
        status: 404,
        body: r#"[{"error":{"type":3,"address":"","description":"resource not available"}}]"#.into(),
    }
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            auth_response: Mutex::new(ok(r#"[{"success":{"username":"test-token"}}]"#)),
            lights: Mutex::new(HashMap::new()),
            on_switch: Mutex::new(None),
        }
    }

    pub(crate) fn add_light(&self, id: &str, on: bool, reachable: bool) {
        self.lights
            .lock()
            .unwrap()
            .insert(id.to_string(), FakeLight { on, reachable });
    }

    pub(crate) fn light(&self, id: &str) -> Option<bool> {
        self.lights.lock().unwrap().get(id).map(|l| l.on)
    }

    /// Answers for the next non-authentication requests, in order
    pub(crate) fn script<I>(&self, responses: I)
    where
        I: IntoIterator<Item = Result<GatewayResponse, TransportError>>,
    {
        self.script.lock().unwrap().extend(responses);
    }

    pub(crate) fn set_auth_response(&self, response: GatewayResponse) {
        *self.auth_response.lock().unwrap() = response;
    }

    /// Called for every accepted switch command
    pub(crate) fn on_switch<F>(&self, hook: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        *self.on_switch.lock().unwrap() = Some(Arc::new(hook));
    }

    pub(crate) fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn auth_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.basic_auth.is_some())
            .count()
    }

    pub(crate) fn api_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.basic_auth.is_none())
            .count()
    }

    pub(crate) fn count(&self, method: HttpMethod, path_suffix: &str) -> usize {
        self.bodies(method, path_suffix).len()
    }

    /// Bodies of the requests matching method and path suffix
    pub(crate) fn bodies(&self, method: HttpMethod, path_suffix: &str) -> Vec<String> {
        self.requests()
            .iter()
            .filter(|r| r.basic_auth.is_none() && r.method == method && r.path.ends_with(path_suffix))
            .map(|r| r.body.clone().unwrap_or_default())
            .collect()
    }

    fn serve(&self, request: &GatewayRequest) -> GatewayResponse {
        let resource = request
            .path
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        let segments: Vec<&str> = resource.split('/').collect();

        match (request.method, segments.as_slice()) {
            (HttpMethod::Get, ["config"]) => ok(r#"{"name":"gateway","websocketport":8088}"#),
            (HttpMethod::Put, ["config"]) => ok(r#"[{"success":{"/config/permitjoin":0}}]"#),
            (HttpMethod::Get, ["lights", id]) => match self.lights.lock().unwrap().get(*id) {
                Some(light) => ok(format!(
                    r#"{{"name":"Outlet","uniqueid":"{}","state":{{"on":{},"reachable":{}}}}}"#,
                    id, light.on, light.reachable
                )),
                None => not_found(),
            },
            (HttpMethod::Put, ["lights", id, "state"]) => {
                let on = request
                    .body
                    .as_deref()
                    .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
                    .and_then(|v| v["on"].as_bool());
                let Some(on) = on else {
                    return GatewayResponse {
                        status: 400,
                        body: "invalid body".into(),
                    };
                };
                match self.lights.lock().unwrap().get_mut(*id) {
                    Some(light) => light.on = on,
                    None => return not_found(),
                }

                let hook = self.on_switch.lock().unwrap().clone();
                if let Some(hook) = hook {
                    hook(id, on);
                }
                ok(format!(r#"[{{"success":{{"/lights/{}/state/on":{}}}}}]"#, id, on))
            }
            _ => not_found(),
        }
    }
}

#[async_trait]
impl GatewayTransport for FakeTransport {
    async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        if request.basic_auth.is_some() {
            return Ok(self.auth_response.lock().unwrap().clone());
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self.serve(request)),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway push
// ---------------------------------------------------------------------------

pub(crate) struct ScriptedConnection {
    frames: VecDeque<String>,
    hang: bool,
    closed: Arc<AtomicBool>,
}

impl ScriptedConnection {
    /// Delivers `frames`, then stays open
    pub(crate) fn hanging(frames: Vec<String>) -> Self {
        Self {
            frames: frames.into(),
            hang: true,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers `frames`, then the peer closes
    pub(crate) fn closing(frames: Vec<String>) -> Self {
        Self {
            hang: false,
            ..Self::hanging(frames)
        }
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl PushConnection for ScriptedConnection {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame));
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

enum ConnectOutcome {
    Fail,
    Connect(ScriptedConnection),
}

/// Connector answering attempts from a script; fails once it runs out
pub(crate) struct FakeConnector {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    attempts: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_failure(&self) {
        self.outcomes.lock().unwrap().push_back(ConnectOutcome::Fail);
    }

    pub(crate) fn push_connection(&self, connection: ScriptedConnection) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ConnectOutcome::Connect(connection));
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, StreamError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(ConnectOutcome::Connect(connection)) => Ok(Box::new(connection)),
            Some(ConnectOutcome::Fail) | None => Err(StreamError::Connect("connection refused".into())),
        }
    }

    fn name(&self) -> &str {
        "fake gateway"
    }
}

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

pub(crate) struct FakePowerManager {
    states: Mutex<HashMap<DeviceId, PowerState>>,
    switches: Mutex<HashMap<DeviceId, Vec<PowerState>>>,
    failures: Mutex<HashMap<bool, u32>>,
    switch_delay: Mutex<Duration>,
    listeners: Mutex<Vec<PowerMeasurementListener>>,
}

impl FakePowerManager {
    pub(crate) fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            switches: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            switch_delay: Mutex::new(Duration::ZERO),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Next `times` switches towards `on` fail
    pub(crate) fn fail_switching(&self, on: bool, times: u32) {
        self.failures.lock().unwrap().insert(on, times);
    }

    /// Switches report their new state at once but return after `delay`
    pub(crate) fn set_switch_delay(&self, delay: Duration) {
        *self.switch_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_state(&self, device: DeviceId, state: PowerState) {
        self.states.lock().unwrap().insert(device, state);
    }

    pub(crate) fn state_of(&self, device: DeviceId) -> PowerState {
        self.states
            .lock()
            .unwrap()
            .get(&device)
            .copied()
            .unwrap_or(PowerState::Off)
    }

    /// Switch requests seen for a device
    pub(crate) fn switches(&self, device: DeviceId) -> Vec<PowerState> {
        self.switches
            .lock()
            .unwrap()
            .get(&device)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn emit_measurement(&self, execution: &Execution, watts: f64) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(execution, watts);
        }
    }
}

#[async_trait]
impl DevicePowerManager for FakePowerManager {
    async fn set_device_power_state(&self, device: &Device, state: PowerState) -> Result<(), PowerError> {
        let on = state.target().ok_or(PowerError::InvalidTarget(state))?;
        self.switches
            .lock()
            .unwrap()
            .entry(device.id)
            .or_default()
            .push(if on { PowerState::On } else { PowerState::Off });

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&on).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(PowerError::NotRegistered(device.name.clone()));
            }
        }

        self.set_state(device.id, if on { PowerState::On } else { PowerState::Off });
        let delay = *self.switch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn get_state(&self, device: &Device) -> Result<PowerState, PowerError> {
        Ok(self.state_of(device.id))
    }

    fn add_power_measurement_listener(&self, listener: PowerMeasurementListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn is_device_registered(&self, device: &Device) -> bool {
        device.endpoint().is_some()
    }

    async fn register_device(&self, _device: &Device) -> Result<bool, PowerError> {
        Ok(false)
    }

    async fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StoreOp {
    Start,
    Reset,
    Stop,
    Pay,
    /// Device told that its execution ended
    Ended,
}

/// [`MemoryStore`] with call counting and failure injection
pub(crate) struct TestStore {
    memory: MemoryStore,
    calls: Mutex<HashMap<StoreOp, u32>>,
    failures: Mutex<HashMap<StoreOp, u32>>,
}

impl TestStore {
    pub(crate) fn new() -> Self {
        Self {
            memory: MemoryStore::new(),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub(crate) fn calls(&self, op: StoreOp) -> u32 {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Next `times` calls of `op` fail
    pub(crate) fn fail(&self, op: StoreOp, times: u32) {
        self.failures.lock().unwrap().insert(op, times);
    }

    fn record(&self, op: StoreOp) {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
    }

    fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        self.record(op);
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Backend(format!("{:?} failed", op)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Store for TestStore {
    async fn managed_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.memory.managed_devices().await
    }

    async fn running_execution(&self, device: DeviceId) -> Result<Option<Execution>, StoreError> {
        self.memory.running_execution(device).await
    }

    async fn start_execution(&self, execution: &Execution) -> Result<Execution, StoreError> {
        self.enter(StoreOp::Start)?;
        self.memory.start_execution(execution).await
    }

    async fn reset_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.enter(StoreOp::Reset)?;
        self.memory.reset_execution(execution).await
    }

    async fn stop_execution(&self, execution: &Execution) -> Result<Execution, StoreError> {
        self.enter(StoreOp::Stop)?;
        self.memory.stop_execution(execution).await
    }

    async fn pay_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.enter(StoreOp::Pay)?;
        self.memory.pay_execution(execution).await
    }

    async fn execution_started_on_device(&self, device: &Device, execution: &Execution) {
        self.memory.execution_started_on_device(device, execution).await
    }

    async fn execution_ended_on_device(&self, device: &Device) {
        self.record(StoreOp::Ended);
        self.memory.execution_ended_on_device(device).await
    }

    async fn rebind_endpoint(&self, device: DeviceId, endpoint_id: &str) -> Result<Device, StoreError> {
        self.memory.rebind_endpoint(device, endpoint_id).await
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Records messages for users with push enabled
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<NotificationMessage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Records, then reports a delivery failure
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub(crate) fn messages(&self) -> Vec<NotificationMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn wants(&self, user: &User) -> bool {
        user.push_enabled
    }

    async fn notify(&self, _user: &User, message: &NotificationMessage) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}
