//! Controller configuration
//!
//! Defaults come from the shared `timing` constants; `from_env` overlays the
//! process environment (a `.env` file is honored).

use anyhow::{bail, Context, Result};
use appliance_shared::timing;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SMTP_PORT: u16 = 587;

/// Gateway connection settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway, without the `/api` suffix
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Name this controller registers under when requesting a token
    pub device_type: String,
    /// Push endpoint port; asked from the gateway when unset
    pub websocket_port: Option<u16>,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub confirmation_timeout: Duration,
    pub pairing_window_secs: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:80".to_string(),
            username: String::new(),
            password: String::new(),
            device_type: "appliance-controller".to_string(),
            websocket_port: None,
            request_timeout: Duration::from_millis(timing::GATEWAY_REQUEST_TIMEOUT_MS),
            max_attempts: timing::GATEWAY_MAX_ATTEMPTS,
            confirmation_timeout: Duration::from_millis(timing::CONFIRMATION_TIMEOUT_MS),
            pairing_window_secs: timing::PAIRING_WINDOW_SECS,
        }
    }
}

/// Push stream reconnect behavior
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(timing::RECONNECT_INITIAL_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(timing::RECONNECT_MAX_DELAY_MS),
            backoff_factor: timing::RECONNECT_BACKOFF_FACTOR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub watchdog_interval: Duration,
    pub workers: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_millis(timing::WATCHDOG_INTERVAL_MS),
            workers: timing::EXECUTION_WORKERS,
        }
    }
}

/// Outgoing mail server
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Laundry <laundry@example.org>`
    pub from: String,
}

/// Credentials of the optional notification channels
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub smtp: Option<SmtpConfig>,
    pub pushover_api_token: Option<String>,
    /// Link attached to notifications, e.g. the booking portal
    pub portal_url: Option<String>,
    pub app_push_url: Option<String>,
    pub app_push_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub gateway: GatewayConfig,
    pub stream: StreamConfig,
    pub execution: ExecutionConfig,
    pub notifications: NotificationConfig,
}

impl ControllerConfig {
    /// Load from the environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let gateway = &mut config.gateway;
        if let Some(url) = lookup("GATEWAY_URL") {
            gateway.base_url = url;
        }
        gateway.username = lookup("GATEWAY_USER").context("GATEWAY_USER must be set")?;
        gateway.password = lookup("GATEWAY_PASSWORD").context("GATEWAY_PASSWORD must be set")?;
        if let Some(device_type) = lookup("GATEWAY_DEVICE_TYPE") {
            gateway.device_type = device_type;
        }
        gateway.websocket_port = parse(&lookup, "GATEWAY_WEBSOCKET_PORT")?;
        if let Some(ms) = parse::<u64, _>(&lookup, "GATEWAY_TIMEOUT_MS")? {
            gateway.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse(&lookup, "GATEWAY_MAX_ATTEMPTS")? {
            gateway.max_attempts = attempts;
        }
        if gateway.max_attempts == 0 {
            bail!("GATEWAY_MAX_ATTEMPTS must be at least 1");
        }

        if let Some(ms) = parse::<u64, _>(&lookup, "WATCHDOG_INTERVAL_MS")? {
            config.execution.watchdog_interval = Duration::from_millis(ms);
        }
        if let Some(workers) = parse(&lookup, "EXECUTION_WORKERS")? {
            config.execution.workers = workers;
        }

        let notifications = &mut config.notifications;
        if let (Some(host), Some(from)) = (lookup("SMTP_HOST"), lookup("SMTP_FROM")) {
            notifications.smtp = Some(SmtpConfig {
                host,
                port: parse(&lookup, "SMTP_PORT")?.unwrap_or(DEFAULT_SMTP_PORT),
                username: lookup("SMTP_USER"),
                password: lookup("SMTP_PASSWORD"),
                from,
            });
        }
        notifications.pushover_api_token = lookup("PUSHOVER_API_TOKEN");
        notifications.portal_url = lookup("PORTAL_URL");
        notifications.app_push_url = lookup("APP_PUSH_URL");
        notifications.app_push_token = lookup("APP_PUSH_TOKEN");

        Ok(config)
    }
}

fn parse<T, L>(lookup: &L, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value: {}", key, raw))
        })
        .transpose()
}
