//! WebSocket push connection to the gateway

use super::error::StreamError;
use super::traits::{PushConnection, PushConnector};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{}:{}", host, port),
        }
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, StreamError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }

    fn name(&self) -> &str {
        &self.url
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("[STREAM] Skipping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite on the next read
                Ok(_) => {}
                Err(e) => return Some(Err(StreamError::Read(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("[STREAM] Close handshake failed: {}", e);
        }
    }
}
