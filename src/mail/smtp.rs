//! SMTP transport built on lettre.
//!
//! Implicit TLS (port 465) unless `starttls` is set. Replies in the 5xx range
//! and messages that cannot be built are permanent; connection problems,
//! timeouts and 4xx replies are transient.

use super::{MailTransport, OutgoingMail};
use crate::config::SmtpConfig;
use crate::error::{DispatchError, TransportError};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::debug;

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Sends through an authenticated SMTP relay.
pub struct SmtpTransport {
    relay: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    host: String,
}

impl SmtpTransport {
    /// Prepare the relay. No connection is made until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self, DispatchError> {
        let sender: Mailbox = config.sender.parse().map_err(|e| {
            DispatchError::InvalidConfig(format!("invalid sender '{}': {}", config.sender, e))
        })?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| DispatchError::InvalidConfig(format!("SMTP host '{}': {}", config.host, e)))?;

        let relay = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.login().to_string(),
                config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self {
            relay,
            sender,
            host: config.host.clone(),
        })
    }

    fn build_message(&self, mail: &OutgoingMail) -> Result<Message, TransportError> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| TransportError::Permanent(format!("invalid recipient '{}': {}", mail.to, e)))?;

        let builder = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(mail.subject.clone());

        let result = match &mail.attachment {
            Some(attachment) => {
                let content_type = ContentType::parse(PDF_CONTENT_TYPE)
                    .map_err(|e| TransportError::Permanent(e.to_string()))?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(mail.body.clone()))
                        .singlepart(
                            Attachment::new(attachment.filename.clone())
                                .body(attachment.content.clone(), content_type),
                        ),
                )
            }
            None => builder.body(mail.body.clone()),
        };

        result.map_err(|e| TransportError::Permanent(format!("message build failed: {}", e)))
    }
}

fn classify(err: lettre::transport::smtp::Error) -> TransportError {
    if err.is_permanent() {
        TransportError::Permanent(err.to_string())
    } else {
        TransportError::Transient(err.to_string())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let message = self.build_message(mail)?;
        let response = self.relay.send(message).await.map_err(classify)?;
        debug!(
            "SMTP {} accepted message to {}: {:?}",
            self.host,
            mail.to,
            response.code()
        );
        Ok(())
    }
}
