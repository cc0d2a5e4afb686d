use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{info, warn};
use std::time::Duration;

use crate::configuration::config::EmailSettings;
use crate::errors::DeliveryError;

// --------------------------------------------------------------------------------------------------------------

/// Outbound channel for the periodic report.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

// --------------------------------------------------------------------------------------------------------------

/// SMTP submission with STARTTLS and login credentials.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from:      Mailbox,
    to:        Mailbox,
    timeout:   Duration,
}

impl SmtpNotifier {
    /// `timeout` applies to every SMTP command.
    pub fn new(settings: &EmailSettings, timeout: Duration) -> Result<Self, DeliveryError> {
        let from = parse_mailbox(settings.sender())?;
        let to   = parse_mailbox(settings.recipient())?;

        let credentials = Credentials::new(settings.address.clone(), settings.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)?
            .port(settings.smtp_port)
            .credentials(credentials)
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport, from, to, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.parse().map_err(|_| DeliveryError::Address(address.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .body(body.to_owned())?;

        self.transport.send(message).await?;
        info!("[Report] Email '{}' sent to {}.", subject, self.to);
        Ok(())
    }
}

// --------------------------------------------------------------------------------------------------------------

/// Either a working SMTP notifier or nothing, when email is not configured.
pub enum Mailer {
    Smtp(SmtpNotifier),
    Disabled,
}

impl Mailer {
    pub fn from_settings(settings: Option<&EmailSettings>, timeout: Duration) -> Self {
        match settings {
            Some(s) if s.is_complete() => match SmtpNotifier::new(s, timeout) {
                Ok(notifier) => {
                    info!(
                        "[Report] Reports go to {} via {}:{} (timeout {}s).",
                        s.recipient(),
                        s.smtp_server,
                        s.smtp_port,
                        notifier.timeout().as_secs()
                    );
                    Mailer::Smtp(notifier)
                }
                Err(e) => {
                    warn!("[Report] Email disabled, invalid settings: {}", e);
                    Mailer::Disabled
                }
            },
            _ => {
                warn!("[Report] Email address/password not configured; reports will not be sent.");
                Mailer::Disabled
            }
        }
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DeliveryError> {
        match self {
            Mailer::Smtp(smtp) => smtp.send(subject, body).await,
            Mailer::Disabled   => Err(DeliveryError::NotConfigured),
        }
    }
}

// --------------------------------------------------------------------------------------------------------------
