//! User notifications about finished executions
//!
//! Delivery is best effort: every configured channel the user opted into is
//! tried, failures are logged and never reach the execution engine.

mod app_push;
mod email;
mod pushover;

pub use app_push::AppPushNotifier;
pub use email::EmailNotifier;
pub use pushover::PushoverNotifier;

use crate::config::NotificationConfig;
use crate::model::{Execution, User};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification service answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Could not build mail: {0}")]
    Mail(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub title: String,
    /// One line, for push channels
    pub short: String,
    /// Full text, for mail-like channels
    pub long: String,
}

impl NotificationMessage {
    pub fn for_execution(execution: &Execution, aborted: bool) -> Self {
        let device = &execution.device.name;
        let user = &execution.user.name;

        if aborted {
            Self {
                title: "Execution aborted!".to_string(),
                short: format!("The program on {} was aborted.", device),
                long: format!(
                    "Hello {},\n\nyour program on {} was just aborted.\n\n--\nappliance-controller",
                    user, device
                ),
            }
        } else {
            Self {
                title: format!("{} has finished!", device),
                short: format!("{} has finished. Please empty it soon.", device),
                long: format!(
                    "Hello {},\n\n{} has just finished.\nPlease empty it soon.\n\n--\nappliance-controller",
                    user, device
                ),
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the user opted into this channel
    fn wants(&self, user: &User) -> bool;

    async fn notify(&self, user: &User, message: &NotificationMessage) -> Result<(), NotifyError>;
}

pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Channels that have credentials configured
    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(smtp) = &config.smtp {
            match EmailNotifier::new(smtp) {
                Ok(email) => notifiers.push(Arc::new(email)),
                Err(e) => warn!("Email notifications disabled: {}", e),
            }
        }
        if let Some(token) = &config.pushover_api_token {
            notifiers.push(Arc::new(PushoverNotifier::new(
                token.clone(),
                config.portal_url.clone(),
            )));
        }
        if let (Some(url), Some(token)) = (&config.app_push_url, &config.app_push_token) {
            notifiers.push(Arc::new(AppPushNotifier::new(url.clone(), token.clone())));
        }
        Self::new(notifiers)
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub async fn dispatch(&self, user: &User, message: &NotificationMessage) {
        for notifier in &self.notifiers {
            if !notifier.wants(user) {
                debug!("{} notification not wanted by {}", notifier.name(), user.name);
                continue;
            }
            match notifier.notify(user, message).await {
                Ok(()) => debug!("Sent {} notification to {}", notifier.name(), user.name),
                Err(e) => error!("Could not send {} notification to {}: {}", notifier.name(), user.name, e),
            }
        }
    }
}

/// A non-blank optional string
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
