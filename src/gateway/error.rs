//! Gateway error types

use thiserror::Error;

/// A request never produced an HTTP response
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// Failures of gateway API and device control calls
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Gateway authentication failed: {0}")]
    Authentication(String),

    #[error("Gateway returned a malformed response: {0}")]
    BadResponse(String),

    #[error("Gateway answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Gateway communication failed after {attempts} attempts: {reason}")]
    Communication { attempts: u32, reason: String },

    #[error("Device {0} is not reachable")]
    Unreachable(String),

    #[error("Device {endpoint} did not confirm on={on} in time")]
    ConfirmationTimeout { endpoint: String, on: bool },

    #[error("Device {endpoint} reported on={reported} after being switched to on={requested}")]
    ConfirmationMismatch {
        endpoint: String,
        requested: bool,
        reported: bool,
    },
}

/// Failures of the push connection
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Could not connect to push endpoint: {0}")]
    Connect(String),

    #[error("Push connection failed: {0}")]
    Read(String),
}
