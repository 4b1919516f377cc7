//! Send one payslip with a bounded number of attempts.
//!
//! ## Retry Strategy
//!
//! Up to `max_attempts` attempts with a fixed `retry_interval` pause between
//! two consecutive attempts (none after the last). A permanent failure ends
//! the loop at once unless `retry_permanent` is set, in which case the full
//! budget is spent regardless.

use super::compose;
use super::MailTransport;
use crate::config::DispatchConfig;
use crate::error::DeliveryError;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Result of [`Mailer::send`]. Never an error: failures are data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub success: bool,
    /// Informational message on success, diagnostic on failure.
    pub message: String,
    /// Attempts made, 0 when the request was rejected up front.
    pub attempts: u32,
    /// Failure of the last attempt.
    pub error: Option<DeliveryError>,
}

impl SendOutcome {
    fn sent(message: String, attempts: u32) -> Self {
        Self {
            success: true,
            message,
            attempts,
            error: None,
        }
    }

    fn failed(error: DeliveryError, attempts: u32) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            attempts,
            error: Some(error),
        }
    }
}

/// Retry policy around a [`MailTransport`].
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    max_attempts: u32,
    retry_interval: Duration,
    retry_permanent: bool,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, config: &DispatchConfig) -> Self {
        Self {
            transport,
            max_attempts: config.max_send_attempts.max(1),
            retry_interval: config.retry_interval(),
            retry_permanent: config.retry_permanent_failures,
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Mail `attachment_path` to `recipient`.
    ///
    /// # Arguments
    /// * `recipient`       — delivery address
    /// * `identifier`      — payroll identifier, quoted in the subject
    /// * `filename`        — attachment name as the recipient sees it
    /// * `attachment_path` — the split file on disk
    pub async fn send(
        &self,
        recipient: &str,
        identifier: &str,
        filename: &str,
        attachment_path: &Path,
    ) -> SendOutcome {
        if recipient.is_empty() || identifier.is_empty() || filename.is_empty() {
            return SendOutcome::failed(DeliveryError::IncompleteMessage, 0);
        }

        let mut last_err = DeliveryError::IncompleteMessage;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                warn!(
                    "{}: retry {}/{} after {:?}",
                    filename,
                    attempt - 1,
                    self.max_attempts - 1,
                    self.retry_interval
                );
                sleep(self.retry_interval).await;
            }

            match self.attempt(recipient, identifier, filename, attachment_path).await {
                Ok(()) => {
                    debug!("{}: delivered to {} on attempt {}", filename, recipient, attempt);
                    return SendOutcome::sent(compose::sent_message(recipient, identifier), attempt);
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", filename, attempt, e);
                    let give_up = !e.is_retryable() && !self.retry_permanent;
                    last_err = e;
                    if give_up {
                        return SendOutcome::failed(last_err, attempt);
                    }
                }
            }
        }

        SendOutcome::failed(last_err, self.max_attempts)
    }

    async fn attempt(
        &self,
        recipient: &str,
        identifier: &str,
        filename: &str,
        attachment_path: &Path,
    ) -> Result<(), DeliveryError> {
        let content = read_attachment(filename, attachment_path).await?;
        let mail = compose::payslip_mail(recipient, identifier, filename, content);
        self.transport.send(&mail).await.map_err(DeliveryError::from)
    }
}

/// Bytes of a `.pdf` attachment that exists as a regular file.
async fn read_attachment(filename: &str, path: &Path) -> Result<Vec<u8>, DeliveryError> {
    let missing = || DeliveryError::MissingAttachment {
        path: path.to_path_buf(),
    };
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(missing());
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(missing()),
    }
    tokio::fs::read(path).await.map_err(|_| missing())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::mail::testing::Scripted;

    fn mailer(transport: Arc<Scripted>, retry_permanent: bool) -> Mailer {
        let config = DispatchConfig::builder()
            .retry_interval_ms(10)
            .retry_permanent_failures(retry_permanent)
            .build()
            .unwrap();
        Mailer::new(transport, &config)
    }

    fn attachment() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1001_ARAF_MAR-2023.pdf");
        std::fs::write(&path, b"%PDF-1.5 payslip").unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let (_dir, path) = attachment();
        let transport = Scripted::new(vec![]);
        let outcome = mailer(Arc::clone(&transport), false)
            .send("a@x.com", "1001", "1001_ARAF_MAR-2023.pdf", &path)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            outcome.message,
            "Email notification sent to a@x.com for user ID 1001."
        );
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "User ID: 1001 in File: 1001_ARAF_MAR-2023.pdf");
        assert_eq!(
            sent[0].attachment.as_ref().unwrap().content,
            b"%PDF-1.5 payslip"
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (_dir, path) = attachment();
        let transport = Scripted::new(vec![
            Err(TransportError::Transient("timeout".into())),
            Err(TransportError::Transient("421 busy".into())),
        ]);
        let outcome = mailer(Arc::clone(&transport), false)
            .send("a@x.com", "1001", "1001_ARAF_MAR-2023.pdf", &path)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_wait_between_each() {
        let (_dir, path) = attachment();
        let transport = Scripted::new(vec![
            Err(TransportError::Transient("first".into())),
            Err(TransportError::Transient("second".into())),
            Err(TransportError::Transient("third".into())),
        ]);
        let config = DispatchConfig::builder()
            .retry_interval_ms(40)
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        let outcome = Mailer::new(transport.clone(), &config)
            .send("a@x.com", "1001", "1001_ARAF_MAR-2023.pdf", &path)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.message.contains("third"));
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn permanent_failure_short_circuits() {
        let (_dir, path) = attachment();
        let transport = Scripted::new(vec![Err(TransportError::Permanent(
            "550 mailbox unavailable".into(),
        ))]);
        let outcome = mailer(Arc::clone(&transport), false)
            .send("a@x.com", "1001", "1001_ARAF_MAR-2023.pdf", &path)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.calls(), 1);
        assert!(matches!(outcome.error, Some(DeliveryError::Permanent { .. })));
    }

    #[tokio::test]
    async fn permanent_failure_spends_budget_when_configured() {
        let (_dir, path) = attachment();
        let transport = Scripted::new(vec![
            Err(TransportError::Permanent("550".into())),
            Err(TransportError::Permanent("550".into())),
            Err(TransportError::Permanent("550".into())),
        ]);
        let outcome = mailer(Arc::clone(&transport), true)
            .send("a@x.com", "1001", "1001_ARAF_MAR-2023.pdf", &path)
            .await;
        assert!(!outcome.success);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn missing_attachment_never_reaches_transport() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Scripted::new(vec![]);
        let outcome = mailer(Arc::clone(&transport), false)
            .send(
                "a@x.com",
                "1001",
                "1001_ARAF_MAR-2023.pdf",
                &dir.path().join("gone.pdf"),
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(transport.calls(), 0);
        assert!(matches!(
            outcome.error,
            Some(DeliveryError::MissingAttachment { .. })
        ));
    }

    #[tokio::test]
    async fn incomplete_request_makes_no_attempt() {
        let (_dir, path) = attachment();
        let transport = Scripted::new(vec![]);
        let outcome = mailer(Arc::clone(&transport), false)
            .send("", "1001", "1001_ARAF_MAR-2023.pdf", &path)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error, Some(DeliveryError::IncompleteMessage));
    }
}
