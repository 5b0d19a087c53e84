use super::{present, NotificationMessage, Notifier, NotifyError};
use crate::config::SmtpConfig;
use crate::model::User;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Mails the long message to users who opted into email
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = config.from.parse::<Mailbox>()?;

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn compose(&self, user: &User, message: &NotificationMessage) -> Result<Message, NotifyError> {
        let address = present(&user.email).unwrap_or_default().parse::<Address>()?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(Some(user.name.clone()), address))
            .subject(message.title.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.long.clone())?;
        Ok(email)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    fn wants(&self, user: &User) -> bool {
        user.email_notification && present(&user.email).is_some()
    }

    async fn notify(&self, user: &User, message: &NotificationMessage) -> Result<(), NotifyError> {
        let email = self.compose(user, message)?;

        info!("Sending email notification to {}", user.name);
        self.mailer.send(email).await?;
        Ok(())
    }
}
