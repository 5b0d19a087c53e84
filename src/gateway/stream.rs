//! Push event stream from the gateway
//!
//! Maintains a single push connection, decodes its frames and fans typed
//! events out to subscribers. A dropped or failed connection is re-established
//! with exponential backoff until the client is stopped.

use super::traits::{PushConnection, PushConnector};
use crate::config::StreamConfig;
use crate::scheduler::shutdown_requested;
use appliance_shared::{decode_event, EventKind, GatewayEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

pub type EventHandler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl Subscribers {
    fn add(&self, kind: EventKind, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(handler);
    }

    fn dispatch(&self, event: &GatewayEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler(event);
        }
    }
}

/// Delay sequence between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.initial_reconnect_delay,
            config.max_reconnect_delay,
            config.backoff_factor,
        )
    }

    /// Delay before the next attempt; grows the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct EventStreamClient {
    connector: Arc<dyn PushConnector>,
    subscribers: Arc<Subscribers>,
    config: StreamConfig,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamClient {
    pub fn new(connector: Arc<dyn PushConnector>, config: StreamConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connector,
            subscribers: Arc::new(Subscribers::default()),
            config,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Register a handler for one kind of event.
    ///
    /// Handlers run on the stream task and must not block.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.subscribers.add(kind, Arc::new(handler));
    }

    /// Begin connecting. Calling it again while running has no effect.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }
        if *self.shutdown_tx.borrow() {
            warn!("[STREAM] Event stream was stopped and cannot be restarted");
            return;
        }

        *task = Some(tokio::spawn(stream_loop(
            self.connector.clone(),
            self.subscribers.clone(),
            ReconnectBackoff::from_config(&self.config),
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Cancel any pending reconnect and close the connection
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("[STREAM] Event stream task failed: {}", e);
            }
        }
    }

    /// Deliver an event to subscribers as if it had arrived on the stream
    #[cfg(test)]
    pub(crate) fn dispatch(&self, event: &GatewayEvent) {
        self.subscribers.dispatch(event);
    }
}

enum ReadOutcome {
    Closed(String),
    Shutdown,
}

/// Connection loop with automatic reconnect
async fn stream_loop(
    connector: Arc<dyn PushConnector>,
    subscribers: Arc<Subscribers>,
    mut backoff: ReconnectBackoff,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        info!("[STREAM] Connecting to {}", connector.name());

        let attempt = tokio::select! {
            result = connector.connect() => Some(result),
            _ = shutdown_requested(&mut shutdown) => None,
        };

        match attempt {
            None => break,
            Some(Ok(connection)) => {
                info!("[STREAM] Connected to {}", connector.name());
                backoff.reset();
                match read_frames(connection, &subscribers, &mut shutdown).await {
                    ReadOutcome::Shutdown => break,
                    ReadOutcome::Closed(reason) => warn!("[STREAM] Connection lost: {}", reason),
                }
            }
            Some(Err(e)) => error!("[STREAM] {}", e),
        }

        let delay = backoff.next_delay();
        info!("[STREAM] Reconnecting in {:.1}s", delay.as_secs_f64());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }

    info!("[STREAM] Event stream stopped");
}

async fn read_frames(
    mut connection: Box<dyn PushConnection>,
    subscribers: &Subscribers,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    loop {
        let frame = tokio::select! {
            frame = connection.next_frame() => Some(frame),
            _ = shutdown_requested(shutdown) => None,
        };

        match frame {
            None => {
                connection.close().await;
                return ReadOutcome::Shutdown;
            }
            Some(Some(Ok(text))) => dispatch_frame(&text, subscribers),
            Some(Some(Err(e))) => return ReadOutcome::Closed(e.to_string()),
            Some(None) => return ReadOutcome::Closed("closed by gateway".into()),
        }
    }
}

fn dispatch_frame(text: &str, subscribers: &Subscribers) {
    match decode_event(text) {
        Ok(Some(event)) => subscribers.dispatch(&event),
        Ok(None) => trace!("[STREAM] Ignoring frame: {}", text),
        Err(e) => warn!("[STREAM] Dropping unreadable frame ({}): {}", e, text),
    }
}
