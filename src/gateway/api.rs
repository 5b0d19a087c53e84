//! Authenticated access to the gateway REST API
//!
//! A token is requested lazily with basic credentials and reused for every
//! call. Transport failures are retried up to the configured number of
//! attempts. A rejected token triggers one re-authentication per request;
//! that retry does not count against the attempt budget.

use super::error::GatewayError;
use super::traits::{GatewayRequest, GatewayTransport, HttpMethod};
use crate::config::GatewayConfig;
use appliance_shared::wire::{self, AuthEntry, AuthRequest, GatewayConfigResource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub struct ApiClient {
    transport: Arc<dyn GatewayTransport>,
    username: String,
    password: String,
    device_type: String,
    max_attempts: u32,
    token: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn GatewayTransport>, config: &GatewayConfig) -> Self {
        Self {
            transport,
            username: config.username.clone(),
            password: config.password.clone(),
            device_type: config.device_type.clone(),
            max_attempts: config.max_attempts.max(1),
            token: Mutex::new(None),
        }
    }

    /// Request a fresh token and replace the cached one
    pub async fn authenticate(&self) -> Result<String, GatewayError> {
        let mut slot = self.token.lock().await;
        let token = self.fetch_token().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Perform an authenticated call and return the body of a 200 response
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<String, GatewayError> {
        let mut failures = 0u32;
        let mut reauthenticated = false;
        let mut last_failure = String::new();

        while failures < self.max_attempts {
            let token = match self.token().await {
                Ok(token) => token,
                Err(GatewayError::Transport(e)) => {
                    failures += 1;
                    warn!("Gateway authentication attempt {} failed: {}", failures, e);
                    last_failure = e.to_string();
                    continue;
                }
                Err(e) => return Err(e),
            };

            let request = GatewayRequest {
                method,
                path: format!("{}/{}", token, path),
                body: body.clone(),
                basic_auth: None,
            };

            match self.transport.send(&request).await {
                Ok(response) if response.status == 200 => return Ok(response.body),
                Ok(response) if response.status == 401 || response.status == 403 => {
                    if reauthenticated {
                        error!("Gateway rejected a freshly issued token for {}", path);
                        return Err(GatewayError::Communication {
                            attempts: failures + 1,
                            reason: format!("unauthorized after re-authentication: {}", response.body),
                        });
                    }
                    warn!("Gateway rejected token, re-authenticating");
                    reauthenticated = true;
                    self.invalidate(&token).await;
                }
                Ok(response) => {
                    return Err(GatewayError::Status {
                        status: response.status,
                        body: response.body,
                    })
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Gateway request {:?} {} failed (attempt {}/{}): {}",
                        method, path, failures, self.max_attempts, e
                    );
                    last_failure = e.to_string();
                }
            }
        }

        error!("Giving up on gateway request {:?} {}", method, path);
        Err(GatewayError::Communication {
            attempts: failures,
            reason: last_failure,
        })
    }

    /// GET a resource and decode it
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let body = self.request(HttpMethod::Get, path, None).await?;
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::BadResponse(format!("{} ({}): {}", path, e, body)))
    }

    /// PUT a JSON body, returning the raw response body
    pub async fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<String, GatewayError> {
        let body = serde_json::to_string(body)
            .map_err(|e| GatewayError::BadResponse(format!("could not encode body: {}", e)))?;
        self.request(HttpMethod::Put, path, Some(body)).await
    }

    /// Read the gateway's configuration resource
    pub async fn gateway_config(&self) -> Result<GatewayConfigResource, GatewayError> {
        self.get_json("config").await
    }

    async fn token(&self) -> Result<String, GatewayError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch_token().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self, stale: &str) {
        let mut slot = self.token.lock().await;
        if slot.as_deref() == Some(stale) {
            *slot = None;
        }
    }

    async fn fetch_token(&self) -> Result<String, GatewayError> {
        let body = serde_json::to_string(&AuthRequest {
            devicetype: self.device_type.clone(),
        })
        .map_err(|e| GatewayError::BadResponse(format!("could not encode body: {}", e)))?;

        let request = GatewayRequest {
            method: HttpMethod::Post,
            path: String::new(),
            body: Some(body),
            basic_auth: Some((self.username.clone(), self.password.clone())),
        };

        debug!("Requesting gateway token as {}", self.username);
        let response = self.transport.send(&request).await?;
        if response.status != 200 {
            error!("Gateway refused authentication with HTTP {}", response.status);
            return Err(GatewayError::Authentication(format!(
                "HTTP {}: {}",
                response.status, response.body
            )));
        }

        let entries: Vec<AuthEntry> = serde_json::from_str(&response.body)
            .map_err(|e| GatewayError::BadResponse(format!("{}: {}", e, response.body)))?;

        match wire::auth_token(&entries) {
            Some(token) => {
                info!("Authenticated at gateway");
                Ok(token.to_string())
            }
            None => {
                error!("Gateway authentication returned no token: {}", response.body);
                Err(GatewayError::Authentication(response.body))
            }
        }
    }
}
