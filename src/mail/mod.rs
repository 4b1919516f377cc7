//! Email delivery capability.
//!
//! [`MailTransport`] is the seam between the delivery job and the outside
//! world: it sends one fully built message and reports transient or
//! permanent failure. [`Mailer`] sits on top and owns the retry policy,
//! the attachment checks and the message wording.
//!
//! ```text
//! DeliveryJob ──▶ Mailer::send ──▶ compose ──▶ MailTransport::send
//!                 (attempts,        (subject,    (SMTP, dry run,
//!                  fixed delay)      body)        test doubles)
//! ```

pub mod compose;
pub mod mailer;
pub mod smtp;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::TransportError;
use async_trait::async_trait;
use tracing::info;

pub use mailer::{Mailer, SendOutcome};
pub use smtp::SmtpTransport;

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// One message, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<MailAttachment>,
}

/// Anything that can deliver an [`OutgoingMail`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;
}

/// Logs every message and reports success without sending anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunTransport;

#[async_trait]
impl MailTransport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        info!(
            "[dry run] to={} subject={:?} attachment={}",
            mail.to,
            mail.subject,
            mail.attachment
                .as_ref()
                .map(|a| format!("{} ({} bytes)", a.filename, a.content.len()))
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }
}
