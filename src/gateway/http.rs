//! HTTP transport to the gateway REST API

use super::error::TransportError;
use super::traits::{GatewayRequest, GatewayResponse, GatewayTransport, HttpMethod};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use std::time::Duration;

pub struct HttpTransport {
    client: Client,
    api_root: String,
}

impl HttpTransport {
    /// Create a transport for a gateway reachable at `base_url`
    /// (e.g. `http://192.168.1.20:8080`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_root: format!("{}/api", base_url.trim_end_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.api_root.clone()
        } else {
            format!("{}/{}", self.api_root, path)
        }
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = self.client.request(method, self.url(&request.path));
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(GatewayResponse { status, body })
    }
}
