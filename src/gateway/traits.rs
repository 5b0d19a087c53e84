//! Transport trait abstraction for the gateway's HTTP API and push endpoint

use super::error::{StreamError, TransportError};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
}

/// One HTTP call below the API root
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: HttpMethod,
    /// Path relative to `/api`, empty for the root itself
    pub path: String,
    pub body: Option<String>,
    /// Basic credentials, only sent when requesting a token
    pub basic_auth: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

/// Sends single requests without any retry logic
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse, TransportError>;
}

/// An open push connection delivering text frames
#[async_trait]
pub trait PushConnection: Send {
    /// Next text frame, or `None` once the peer closed the connection
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>>;

    /// Close the connection gracefully
    async fn close(&mut self);
}

/// Factory for push connections
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Attempt to connect, returning a connection on success
    async fn connect(&self) -> Result<Box<dyn PushConnection>, StreamError>;

    /// Human-readable description of the endpoint
    fn name(&self) -> &str;
}
