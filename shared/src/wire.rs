//! JSON bodies of the gateway REST API

use serde::{Deserialize, Serialize};

/// Body sent to obtain an API key
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    pub devicetype: String,
}

/// One entry of the authentication response array
#[derive(Debug, Clone, Deserialize)]
pub struct AuthEntry {
    pub success: Option<AuthSuccess>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSuccess {
    pub username: Option<String>,
}

/// Error object the gateway embeds in failed responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub kind: Option<i64>,
    pub address: Option<String>,
    pub description: Option<String>,
}

/// Extract the token from an authentication response.
///
/// Exactly one entry carrying a non-empty username counts as success.
pub fn auth_token(entries: &[AuthEntry]) -> Option<&str> {
    match entries {
        [entry] => entry
            .success
            .as_ref()
            .and_then(|s| s.username.as_deref())
            .filter(|u| !u.trim().is_empty()),
        _ => None,
    }
}

/// A switchable outlet as returned by `GET lights/<id>`
#[derive(Debug, Clone, Deserialize)]
pub struct LightResource {
    pub name: Option<String>,
    pub uniqueid: Option<String>,
    pub state: LightState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightState {
    pub on: Option<bool>,
    pub reachable: Option<bool>,
}

/// Body of `PUT lights/<id>/state`
#[derive(Debug, Clone, Serialize)]
pub struct SetStateBody {
    pub on: bool,
}

/// Subset of `GET config`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfigResource {
    pub name: Option<String>,
    pub websocketport: Option<u16>,
}

/// Body of `PUT config` that opens or closes the pairing window
#[derive(Debug, Clone, Serialize)]
pub struct PairingConfig {
    pub permitjoin: u32,
}
