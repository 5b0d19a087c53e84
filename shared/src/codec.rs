//! Push-frame codec for the gateway event stream
//!
//! Every frame is a single JSON object:
//! ```text
//! {"t":"event","e":"changed","r":"lights","id":"3","uniqueid":"..","state":{"on":true}}
//! ```
//!
//! Only three shapes matter to the controller: an outlet switching on or off,
//! a power sensor reporting watts, and a newly paired outlet. Everything else
//! decodes to `None`.

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while decoding a frame
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed gateway frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Gateway frame for {resource} is missing `{field}`")]
    MissingField {
        resource: &'static str,
        field: &'static str,
    },
}

/// Kinds of events a subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    PowerMeasured,
    DeviceAdded,
}

/// A decoded, relevant gateway event
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// An outlet reported its relay state
    StateChanged { unique_id: String, on: bool },
    /// A power sensor reported its current draw
    PowerMeasured { unique_id: String, watts: f64 },
    /// A new outlet joined while pairing was open
    DeviceAdded { unique_id: String },
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::StateChanged { .. } => EventKind::StateChanged,
            GatewayEvent::PowerMeasured { .. } => EventKind::PowerMeasured,
            GatewayEvent::DeviceAdded { .. } => EventKind::DeviceAdded,
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            GatewayEvent::StateChanged { unique_id, .. }
            | GatewayEvent::PowerMeasured { unique_id, .. }
            | GatewayEvent::DeviceAdded { unique_id } => unique_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    e: Option<String>,
    r: Option<String>,
    uniqueid: Option<String>,
    state: Option<RawState>,
}

#[derive(Debug, Deserialize)]
struct RawState {
    on: Option<bool>,
    power: Option<f64>,
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for well-formed frames the controller does not act on.
pub fn decode_event(text: &str) -> Result<Option<GatewayEvent>, CodecError> {
    let frame: RawFrame = serde_json::from_str(text)?;

    let resource = frame.r.as_deref().unwrap_or_default();
    let change = frame.e.as_deref().unwrap_or_default();

    match (resource, change) {
        ("lights", "added") => Ok(Some(GatewayEvent::DeviceAdded {
            unique_id: require_id(frame.uniqueid, "lights")?,
        })),
        ("lights", _) => match frame.state.and_then(|s| s.on) {
            Some(on) => Ok(Some(GatewayEvent::StateChanged {
                unique_id: require_id(frame.uniqueid, "lights")?,
                on,
            })),
            None => Ok(None),
        },
        ("sensors", _) => match frame.state.and_then(|s| s.power) {
            Some(watts) => Ok(Some(GatewayEvent::PowerMeasured {
                unique_id: require_id(frame.uniqueid, "sensors")?,
                watts,
            })),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

fn require_id(id: Option<String>, resource: &'static str) -> Result<String, CodecError> {
    id.filter(|id| !id.is_empty())
        .ok_or(CodecError::MissingField {
            resource,
            field: "uniqueid",
        })
}
