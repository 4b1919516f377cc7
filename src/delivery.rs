//! DeliveryJob: mail every active split file and sort it by outcome.
//!
//! Files are handled one at a time in directory listing order. Before each
//! file the job checks for cancellation (token or tracker status); a file
//! already being sent finishes first. Everything a poller needs (counters,
//! log trail, error trail, completion flag) is written to the job's
//! [`DeliveryState`] entry.
//!
//! ```text
//! directory/
//!   1001_ARAF_MAR-2023.pdf      ── sent ──▶  success_mail/
//!   1002_OKAFOR_MAR-2023.pdf    ── failed ─▶ failed_mail/
//! ```
//!
//! A retry run picks up `failed_mail/` first, then any active files still in
//! the main directory. Files that fail again stay where they are.

use crate::config::DispatchConfig;
use crate::error::DeliveryError;
use crate::mail::{compose, Mailer};
use crate::pipeline::naming::{identifier_of, list_pdf_files};
use crate::reconcile::reconcile;
use crate::registry::Registry;
use crate::tracker::{DeliveryState, ErrorEntry, LogEntry, ProgressTracker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One file scheduled for delivery.
#[derive(Debug, Clone)]
struct WorkItem {
    file_name: String,
    directory: PathBuf,
    /// Retry runs look here before `directory`.
    failed_first: Option<PathBuf>,
    success_dir: PathBuf,
    /// Where a failed file goes; `None` leaves it in place.
    on_failure: Option<PathBuf>,
}

impl WorkItem {
    /// Current location of the file, resolved right before it is sent.
    fn source(&self) -> PathBuf {
        if let Some(failed) = &self.failed_first {
            let candidate = failed.join(&self.file_name);
            if candidate.exists() {
                return candidate;
            }
        }
        self.directory.join(&self.file_name)
    }
}

/// Sends split files to their owners and tracks the outcome.
#[derive(Clone)]
pub struct DeliveryJob {
    registry: Arc<dyn Registry>,
    mailer: Mailer,
    tracker: Arc<ProgressTracker<DeliveryState>>,
    success_dir: String,
    failed_dir: String,
}

impl DeliveryJob {
    pub fn new(
        registry: Arc<dyn Registry>,
        mailer: Mailer,
        tracker: Arc<ProgressTracker<DeliveryState>>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            mailer,
            tracker,
            success_dir: config.success_dir.clone(),
            failed_dir: config.failed_dir.clone(),
        }
    }

    /// Deliver every active file in `directory`.
    ///
    /// Always ends with `completed == true` and returns the final state.
    pub async fn run(
        &self,
        directory: &Path,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> DeliveryState {
        self.ensure_entry(task_id);
        info!("Delivery {} started for '{}'", task_id, directory.display());

        match self.plan_run(directory) {
            Ok(items) => self.process(task_id, items, cancel).await,
            Err(reason) => self.record_setup_failure(task_id, reason),
        }
        self.finish(task_id)
    }

    /// Deliver previously failed files, then active files never attempted.
    pub async fn retry_run(
        &self,
        directory: &Path,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> DeliveryState {
        self.ensure_entry(task_id);
        info!("Retry delivery {} started for '{}'", task_id, directory.display());

        match self.plan_retry(directory) {
            Ok(items) => self.process(task_id, items, cancel).await,
            Err(reason) => self.record_setup_failure(task_id, reason),
        }
        self.finish(task_id)
    }

    // ── Planning ─────────────────────────────────────────────────────────

    fn prepare_dirs(&self, directory: &Path) -> Result<(PathBuf, PathBuf), String> {
        let success = directory.join(&self.success_dir);
        let failed = directory.join(&self.failed_dir);
        for dir in [&success, &failed] {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("cannot create '{}': {}", dir.display(), e))?;
        }
        Ok((success, failed))
    }

    /// Active files of the main directory, in listing order.
    fn active_files(&self, directory: &Path) -> Result<Vec<String>, String> {
        let partitions = reconcile(directory, self.registry.as_ref()).map_err(|e| e.to_string())?;
        let names = list_pdf_files(directory)
            .map_err(|e| format!("cannot list '{}': {}", directory.display(), e))?;
        Ok(names
            .into_iter()
            .filter(|name| partitions.is_active(identifier_of(name)))
            .collect())
    }

    fn plan_run(&self, directory: &Path) -> Result<Vec<WorkItem>, String> {
        let (success, failed) = self.prepare_dirs(directory)?;
        Ok(self
            .active_files(directory)?
            .into_iter()
            .map(|file_name| WorkItem {
                file_name,
                directory: directory.to_path_buf(),
                failed_first: None,
                success_dir: success.clone(),
                on_failure: Some(failed.clone()),
            })
            .collect())
    }

    fn plan_retry(&self, directory: &Path) -> Result<Vec<WorkItem>, String> {
        let (success, failed) = self.prepare_dirs(directory)?;
        let failed_files = list_pdf_files(&failed)
            .map_err(|e| format!("cannot list '{}': {}", failed.display(), e))?;
        let new_files = self.active_files(directory)?;

        Ok(failed_files
            .into_iter()
            .chain(new_files)
            .map(|file_name| WorkItem {
                file_name,
                directory: directory.to_path_buf(),
                failed_first: Some(failed.clone()),
                success_dir: success.clone(),
                on_failure: None,
            })
            .collect())
    }

    // ── Processing ───────────────────────────────────────────────────────

    async fn process(&self, task_id: &str, items: Vec<WorkItem>, cancel: &CancellationToken) {
        let total = items.len();
        self.tracker.update(task_id, |s| s.total = total);
        info!(
            "Delivery {}: {} files to send via {}",
            task_id,
            total,
            self.mailer.transport_name()
        );

        for item in items {
            if self.is_canceled(task_id, cancel) {
                info!("Delivery {} canceled", task_id);
                break;
            }
            self.deliver(task_id, &item).await;
        }
    }

    fn is_canceled(&self, task_id: &str, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled()
            || self
                .tracker
                .update(task_id, |s| s.is_canceled())
                .unwrap_or(false)
    }

    async fn deliver(&self, task_id: &str, item: &WorkItem) {
        let identifier = identifier_of(&item.file_name);

        let email = match self.registry.find_by_identifier(identifier) {
            Ok(Some(user)) => user.email,
            Ok(None) => {
                let err = DeliveryError::RecipientNotFound {
                    identifier: identifier.to_string(),
                };
                self.record_failure(task_id, item, "", err.to_string(), err.to_string());
                return;
            }
            Err(e) => {
                let detail = format!("registry lookup for '{}' failed: {}", identifier, e);
                self.record_failure(task_id, item, "", detail.clone(), detail);
                return;
            }
        };

        let source = item.source();
        let outcome = self
            .mailer
            .send(&email, identifier, &item.file_name, &source)
            .await;

        if outcome.success {
            let move_err = self
                .move_into(&source, &item.success_dir, &item.file_name)
                .await
                .err();
            self.record_success(task_id, item, &email, outcome.message, move_err);
        } else {
            let mut error = outcome.message;
            if let Some(failed_dir) = &item.on_failure {
                if let Err(e) = self.move_into(&source, failed_dir, &item.file_name).await {
                    error = format!("{error}; {e}");
                }
            }
            self.record_failure(task_id, item, &email, compose::failed_message(&email), error);
        }
    }

    async fn move_into(&self, source: &Path, dir: &Path, file_name: &str) -> Result<(), String> {
        let target = dir.join(file_name);
        tokio::fs::rename(source, &target).await.map_err(|e| {
            format!(
                "could not move '{}' to '{}': {}",
                source.display(),
                target.display(),
                e
            )
        })
    }

    // ── State updates ────────────────────────────────────────────────────

    fn ensure_entry(&self, task_id: &str) {
        if !self.tracker.contains(task_id) {
            self.tracker.create(task_id, DeliveryState::default());
        }
    }

    fn record_success(
        &self,
        task_id: &str,
        item: &WorkItem,
        email: &str,
        message: String,
        move_err: Option<String>,
    ) {
        debug!("Delivery {}: {} sent to {}", task_id, item.file_name, email);
        let ts = timestamp();
        if let Some(e) = &move_err {
            warn!("Delivery {}: {}", task_id, e);
        }
        self.tracker.update(task_id, |s| {
            s.sent += 1;
            s.logs.push(LogEntry {
                timestamp: ts.clone(),
                message,
                file: item.file_name.clone(),
                email: email.to_string(),
            });
            if let Some(error) = move_err {
                s.errors.push(ErrorEntry {
                    timestamp: ts,
                    file: item.file_name.clone(),
                    email: email.to_string(),
                    error,
                });
            }
        });
    }

    fn record_failure(
        &self,
        task_id: &str,
        item: &WorkItem,
        email: &str,
        message: String,
        error: String,
    ) {
        warn!("Delivery {}: {} not delivered: {}", task_id, item.file_name, error);
        let ts = timestamp();
        self.tracker.update(task_id, |s| {
            s.failed += 1;
            s.logs.push(LogEntry {
                timestamp: ts.clone(),
                message,
                file: item.file_name.clone(),
                email: email.to_string(),
            });
            s.errors.push(ErrorEntry {
                timestamp: ts,
                file: item.file_name.clone(),
                email: email.to_string(),
                error,
            });
        });
    }

    fn record_setup_failure(&self, task_id: &str, reason: String) {
        warn!("Delivery {} could not start: {}", task_id, reason);
        let ts = timestamp();
        self.tracker.update(task_id, |s| {
            s.errors.push(ErrorEntry {
                timestamp: ts,
                file: String::new(),
                email: String::new(),
                error: reason,
            });
        });
    }

    fn finish(&self, task_id: &str) -> DeliveryState {
        self.tracker.update(task_id, |s| s.completed = true);
        let state = self.tracker.get(task_id);
        info!(
            "Delivery {} finished: {}/{} sent, {} failed{}",
            task_id,
            state.sent,
            state.total,
            state.failed,
            if state.is_canceled() { " (canceled)" } else { "" }
        );
        state
    }
}
