//! Configuration types for splitting and delivery.
//!
//! Every tunable lives in [`DispatchConfig`], built via its
//! [`DispatchConfigBuilder`]. SMTP connection settings are kept apart in
//! [`SmtpConfig`] because only the SMTP transport reads them.

use crate::error::DispatchError;
use crate::pipeline::template::{PayslipTemplate, StandardTemplate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the splitter, the mailer and the job dispatcher.
///
/// Built via [`DispatchConfig::builder()`] or using
/// [`DispatchConfig::default()`].
///
/// # Example
/// ```rust
/// use payslip_dispatch::DispatchConfig;
///
/// let config = DispatchConfig::builder()
///     .page_delay_ms(0)
///     .max_send_attempts(5)
///     .retry_interval_ms(1_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_send_attempts, 5);
/// ```
#[derive(Clone)]
pub struct DispatchConfig {
    /// Pause after each page of a split, in milliseconds. Default: 100.
    pub page_delay_ms: u64,

    /// Send attempts per file before it is routed to the failed store. Default: 3.
    pub max_send_attempts: u32,

    /// Fixed pause between two send attempts, in milliseconds. Default: 5000.
    pub retry_interval_ms: u64,

    /// Spend the full attempt budget on permanent failures too. Default: false.
    ///
    /// When false, a permanent transport error or a missing attachment ends
    /// the send after the first attempt.
    pub retry_permanent_failures: bool,

    /// Subdirectory (under the delivery directory) for delivered files. Default: `success_mail`.
    pub success_dir: String,

    /// Subdirectory for files whose delivery failed. Default: `failed_mail`.
    pub failed_dir: String,

    /// Jobs allowed to run at once; further jobs wait for a slot. Default: 4.
    pub max_concurrent_jobs: usize,

    /// Page layout used to pull employee fields out of page text.
    pub template: Arc<dyn PayslipTemplate>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: 100,
            max_send_attempts: 3,
            retry_interval_ms: 5_000,
            retry_permanent_failures: false,
            success_dir: "success_mail".to_string(),
            failed_dir: "failed_mail".to_string(),
            max_concurrent_jobs: 4,
            template: Arc::new(StandardTemplate::default()),
        }
    }
}

impl fmt::Debug for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchConfig")
            .field("page_delay_ms", &self.page_delay_ms)
            .field("max_send_attempts", &self.max_send_attempts)
            .field("retry_interval_ms", &self.retry_interval_ms)
            .field("retry_permanent_failures", &self.retry_permanent_failures)
            .field("success_dir", &self.success_dir)
            .field("failed_dir", &self.failed_dir)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("template", &self.template.name())
            .finish()
    }
}

impl DispatchConfig {
    /// Create a new builder for `DispatchConfig`.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    pub fn page_delay_ms(mut self, ms: u64) -> Self {
        self.config.page_delay_ms = ms;
        self
    }

    pub fn max_send_attempts(mut self, n: u32) -> Self {
        self.config.max_send_attempts = n;
        self
    }

    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    pub fn retry_permanent_failures(mut self, v: bool) -> Self {
        self.config.retry_permanent_failures = v;
        self
    }

    pub fn success_dir(mut self, name: impl Into<String>) -> Self {
        self.config.success_dir = name.into();
        self
    }

    pub fn failed_dir(mut self, name: impl Into<String>) -> Self {
        self.config.failed_dir = name.into();
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n;
        self
    }

    pub fn template(mut self, template: Arc<dyn PayslipTemplate>) -> Self {
        self.config.template = template;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DispatchConfig, DispatchError> {
        let c = &self.config;
        if c.max_send_attempts == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_send_attempts must be ≥ 1".into(),
            ));
        }
        if c.max_concurrent_jobs == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        for (label, dir) in [("success_dir", &c.success_dir), ("failed_dir", &c.failed_dir)] {
            if dir.is_empty() || dir.contains(['/', '\\']) || dir == "." || dir == ".." {
                return Err(DispatchError::InvalidConfig(format!(
                    "{label} must be a plain directory name, got '{dir}'"
                )));
            }
        }
        if c.success_dir == c.failed_dir {
            return Err(DispatchError::InvalidConfig(
                "success_dir and failed_dir must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── SMTP ─────────────────────────────────────────────────────────────────

/// Connection settings for [`crate::mail::smtp::SmtpTransport`].
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    /// Default: 465 (implicit TLS).
    pub port: u16,
    /// Address placed in `From:`.
    pub sender: String,
    /// Login name. Falls back to `sender` when `None`.
    pub username: Option<String>,
    pub password: String,
    /// Connect in plain text and upgrade with STARTTLS instead of implicit TLS.
    pub starttls: bool,
    /// Per-command timeout in seconds. Default: 30.
    pub timeout_secs: u64,
}

impl SmtpConfig {
    pub fn new(
        host: impl Into<String>,
        sender: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 465,
            sender: sender.into(),
            username: None,
            password: password.into(),
            starttls: false,
            timeout_secs: 30,
        }
    }

    pub fn login(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.sender)
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("sender", &self.sender)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("starttls", &self.starttls)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
