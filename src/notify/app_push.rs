use super::{present, NotificationMessage, Notifier, NotifyError};
use crate::model::User;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

/// Push service of the companion app
pub struct AppPushNotifier {
    client: Client,
    url: String,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    user_ids: [&'a str; 1],
    notification: PushContent<'a>,
}

#[derive(Debug, Serialize)]
struct PushContent<'a> {
    title: &'a str,
    message: &'a str,
}

impl AppPushNotifier {
    pub fn new(url: String, api_token: String) -> Self {
        Self {
            client: Client::new(),
            url,
            api_token,
        }
    }
}

#[async_trait]
impl Notifier for AppPushNotifier {
    fn name(&self) -> &'static str {
        "app-push"
    }

    fn wants(&self, user: &User) -> bool {
        user.push_enabled && present(&user.push_id).is_some()
    }

    async fn notify(&self, user: &User, message: &NotificationMessage) -> Result<(), NotifyError> {
        let request = PushRequest {
            user_ids: [present(&user.push_id).unwrap_or_default()],
            notification: PushContent {
                title: &message.title,
                message: &message.short,
            },
        };

        info!("Sending app push notification to {}", user.name);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(())
    }
}
