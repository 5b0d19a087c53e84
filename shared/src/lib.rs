//! Appliance Controller Shared Types
//!
//! This crate provides the wire types spoken by the home-automation gateway,
//! the codec for its push-event frames, and the lifecycle state machine used
//! by the execution engine.

pub mod codec;
pub mod state_machine;
pub mod wire;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{decode_event, CodecError, EventKind, GatewayEvent};
pub use state_machine::{ExecutionLifecycle, ExecutionState, LifecycleEvent, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for the controller
pub mod timing {
    /// How long a state command waits for its confirming push event
    pub const CONFIRMATION_TIMEOUT_MS: u64 = 5000;

    /// How long the gateway accepts new devices once pairing is enabled
    pub const PAIRING_WINDOW_SECS: u32 = 30;

    /// First reconnect delay of the push stream
    pub const RECONNECT_INITIAL_DELAY_MS: u64 = 5000;

    /// Upper bound for the push stream reconnect delay
    pub const RECONNECT_MAX_DELAY_MS: u64 = 300_000;

    /// Growth of the reconnect delay per failed attempt
    pub const RECONNECT_BACKOFF_FACTOR: f64 = 1.5;

    /// Interval of the unsupervised-device watchdog
    pub const WATCHDOG_INTERVAL_MS: u64 = 20_000;

    /// Transport failures tolerated per gateway request
    pub const GATEWAY_MAX_ATTEMPTS: u32 = 4;

    /// Timeout of a single gateway HTTP call
    pub const GATEWAY_REQUEST_TIMEOUT_MS: u64 = 10_000;

    /// Workers available to scheduled execution work
    pub const EXECUTION_WORKERS: usize = 4;
}
