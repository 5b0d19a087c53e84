use super::{present, NotificationMessage, Notifier, NotifyError};
use crate::model::User;
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover client, enabled per user by a Pushover user key
pub struct PushoverNotifier {
    client: Client,
    api_token: String,
    portal_url: Option<String>,
}

impl PushoverNotifier {
    pub fn new(api_token: String, portal_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_token,
            portal_url,
        }
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    fn name(&self) -> &'static str {
        "pushover"
    }

    fn wants(&self, user: &User) -> bool {
        present(&user.pushover_user_key).is_some()
    }

    async fn notify(&self, user: &User, message: &NotificationMessage) -> Result<(), NotifyError> {
        let user_key = present(&user.pushover_user_key).unwrap_or_default();

        let mut form = vec![
            ("token", self.api_token.as_str()),
            ("user", user_key),
            ("title", message.title.as_str()),
            ("message", message.short.as_str()),
            ("priority", "1"),
        ];
        if let Some(url) = &self.portal_url {
            form.push(("url", url.as_str()));
            form.push(("url_title", "Portal"));
        }

        info!("Sending Pushover notification to {}", user.name);
        let response = self.client.post(PUSHOVER_URL).form(&form).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(())
    }
}
