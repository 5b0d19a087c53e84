//! Gateway access
//!
//! Handles communication with the home-automation gateway:
//! - Authenticated REST calls with retry and token refresh
//! - The push event stream with automatic reconnect
//! - Transport seams so both can run against fakes

mod api;
mod error;
mod http;
mod stream;
mod traits;
mod websocket;

pub use api::ApiClient;
pub use error::{GatewayError, StreamError, TransportError};
pub use http::HttpTransport;
pub use stream::{EventHandler, EventStreamClient, ReconnectBackoff};
pub use traits::{
    GatewayRequest, GatewayResponse, GatewayTransport, HttpMethod, PushConnection, PushConnector,
};
pub use websocket::WebSocketConnector;
