use anyhow::{Context, Result};
use appliance_controller::config::ControllerConfig;
use appliance_controller::devices::{DevicePowerManager, GatewayPowerManager};
use appliance_controller::execution::{ExecutionEvent, ExecutionManager, ExecutionRegistry};
use appliance_controller::gateway::{ApiClient, EventStreamClient, HttpTransport, WebSocketConnector};
use appliance_controller::notify::NotificationDispatcher;
use appliance_controller::store::MemoryStore;
use std::sync::Arc;
use tokio::sync::broadcast;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ControllerConfig::from_env()?;

    info!("Appliance controller starting");
    info!("  Gateway: {}", config.gateway.base_url);

    let transport = HttpTransport::new(&config.gateway.base_url, config.gateway.request_timeout)
        .context("Failed to create HTTP client")?;
    let api = Arc::new(ApiClient::new(Arc::new(transport), &config.gateway));

    let websocket_port = match config.gateway.websocket_port {
        Some(port) => port,
        None => api
            .gateway_config()
            .await
            .context("Failed to read gateway configuration")?
            .websocketport
            .context("Gateway does not report a websocket port")?,
    };
    let host = reqwest::Url::parse(&config.gateway.base_url)
        .context("Invalid gateway URL")?
        .host_str()
        .context("Gateway URL has no host")?
        .to_string();
    info!("  Push endpoint: ws://{}:{}", host, websocket_port);

    let stream = Arc::new(EventStreamClient::new(
        Arc::new(WebSocketConnector::new(&host, websocket_port)),
        config.stream.clone(),
    ));

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ExecutionRegistry::new());
    let power = Arc::new(GatewayPowerManager::new(
        api,
        stream.clone(),
        store.clone(),
        registry.clone(),
        &config.gateway,
    ));
    stream.start();

    let notifications = Arc::new(NotificationDispatcher::from_config(&config.notifications));
    info!("  Notification channels: {:?}", notifications.channels());

    let manager = ExecutionManager::new(
        power.clone(),
        store,
        notifications,
        registry,
        config.execution.clone(),
    );

    // Spawn execution event logger
    let events = manager.subscribe();
    tokio::spawn(async move {
        log_execution_events(events).await;
    });

    let resumed = manager.resume_running_executions().await;
    info!("Resumed {} running executions", resumed);

    manager.start_watchdog();
    info!("Watchdog started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    manager.shutdown();
    power.shutdown().await;

    Ok(())
}

async fn log_execution_events(mut events: broadcast::Receiver<ExecutionEvent>) {
    loop {
        match events.recv().await {
            Ok(ExecutionEvent::Started(execution)) => {
                info!("[{}] Execution {} started", execution.device.name, execution.id);
            }
            Ok(ExecutionEvent::Finished(execution)) => {
                info!("[{}] Execution {} finished", execution.device.name, execution.id);
            }
            Ok(ExecutionEvent::Failed { execution, reason }) => {
                error!(
                    "[{}] Execution {} could not be finished: {}",
                    execution.device.name, execution.id, reason
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Execution event log skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
