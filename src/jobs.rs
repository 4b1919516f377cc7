//! Dispatcher: starts split and delivery jobs as managed tokio tasks.
//!
//! Every job gets a time-derived task id, a tracker entry that exists before
//! the job is spawned, and a [`JobHandle`] the caller may await or drop.
//! Jobs queue on a semaphore sized `max_concurrent_jobs`; a delivery job
//! also owns a [`CancellationToken`] that [`Dispatcher::cancel`] fires.
//!
//! ```text
//! start_split ───▶ [permit] ──▶ DocumentSplitter ──▶ split tracker
//! start_delivery ▶ [permit] ──▶ DeliveryJob::run ──▶ delivery tracker
//! start_retry ───▶ [permit] ──▶ DeliveryJob::retry_run
//! ```

use crate::config::DispatchConfig;
use crate::delivery::DeliveryJob;
use crate::error::DispatchError;
use crate::export::export_archive;
use crate::mail::{MailTransport, Mailer};
use crate::pipeline::split::DocumentSplitter;
use crate::progress::{SplitProgressCallback, TrackerProgress};
use crate::reconcile::{reconcile, PartitionSets};
use crate::registry::Registry;
use crate::tracker::{DeliveryState, ProgressTracker, SplitProgress, TaskStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A spawned job and the id it is tracked under.
#[derive(Debug)]
pub struct JobHandle<T> {
    task_id: String,
    handle: JoinHandle<T>,
}

impl<T> JobHandle<T> {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<T, DispatchError> {
        self.handle
            .await
            .map_err(|e| DispatchError::Internal(format!("Job {} panicked: {}", self.task_id, e)))
    }
}

type TokenMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Owns the trackers and everything a job needs.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct Dispatcher {
    config: DispatchConfig,
    registry: Arc<dyn Registry>,
    splitter: DocumentSplitter,
    delivery: DeliveryJob,
    split_tracker: Arc<ProgressTracker<SplitProgress>>,
    delivery_tracker: Arc<ProgressTracker<DeliveryState>>,
    permits: Arc<Semaphore>,
    tokens: TokenMap,
    /// Serialises id generation with tracker entry creation.
    id_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let delivery_tracker = Arc::new(ProgressTracker::new());
        let mailer = Mailer::new(transport, &config);
        let delivery = DeliveryJob::new(
            Arc::clone(&registry),
            mailer,
            Arc::clone(&delivery_tracker),
            &config,
        );

        Self {
            splitter: DocumentSplitter::from_config(&config),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            registry,
            delivery,
            split_tracker: Arc::new(ProgressTracker::new()),
            delivery_tracker,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            id_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn split_tracker(&self) -> &Arc<ProgressTracker<SplitProgress>> {
        &self.split_tracker
    }

    pub fn delivery_tracker(&self) -> &Arc<ProgressTracker<DeliveryState>> {
        &self.delivery_tracker
    }

    // ── Task ids ─────────────────────────────────────────────────────────

    /// Create a tracker entry under a fresh id and return the id.
    ///
    /// Ids are `{unix_seconds}.{micros:06}`, suffixed `-{n}` while either
    /// tracker already holds one. Nothing is kept beyond the trackers.
    fn register<S: Clone + Default>(&self, tracker: &ProgressTracker<S>, initial: S) -> String {
        let _guard = self.id_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = chrono::Utc::now();
        let base = format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros());

        let mut id = base.clone();
        let mut n = 1;
        while self.split_tracker.contains(&id) || self.delivery_tracker.contains(&id) {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        tracker.create(&id, initial);
        id
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Split `source` into `output_dir` in the background.
    ///
    /// The handle resolves to `true` when the batch was processed to the
    /// end. Progress is available through [`get_progress`](Self::get_progress)
    /// as soon as this returns.
    pub fn start_split(
        &self,
        source: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> JobHandle<bool> {
        let task_id = self.register(&self.split_tracker, SplitProgress::default());

        let source = source.into();
        let output_dir = output_dir.into();
        let splitter = self.splitter.clone();
        let tracker = Arc::clone(&self.split_tracker);
        let permits = Arc::clone(&self.permits);
        let progress: Arc<dyn SplitProgressCallback> =
            Arc::new(TrackerProgress::new(Arc::clone(&tracker), &task_id));
        let id = task_id.clone();

        info!("Split {} queued for '{}'", task_id, source.display());
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            match splitter.split(&source, &output_dir, progress).await {
                Ok(_) => true,
                Err(e) => {
                    // A panicked worker never reached on_split_failed.
                    tracker.update(&id, |p| {
                        if !p.is_finished() {
                            *p = SplitProgress::Failed {
                                reason: e.to_string(),
                            };
                        }
                    });
                    false
                }
            }
        });

        JobHandle { task_id, handle }
    }

    /// Mail every active file in `directory` in the background.
    pub fn start_delivery(&self, directory: impl Into<PathBuf>) -> JobHandle<DeliveryState> {
        self.spawn_delivery(directory.into(), false)
    }

    /// Re-send failed files, then active files never attempted.
    pub fn start_retry(&self, directory: impl Into<PathBuf>) -> JobHandle<DeliveryState> {
        self.spawn_delivery(directory.into(), true)
    }

    fn spawn_delivery(&self, directory: PathBuf, retry: bool) -> JobHandle<DeliveryState> {
        let task_id = self.register(&self.delivery_tracker, DeliveryState::default());

        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.clone(), token.clone());

        let job = self.delivery.clone();
        let permits = Arc::clone(&self.permits);
        let tokens = Arc::clone(&self.tokens);
        let id = task_id.clone();

        info!(
            "{} {} queued for '{}'",
            if retry { "Retry" } else { "Delivery" },
            task_id,
            directory.display()
        );
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let state = if retry {
                job.retry_run(&directory, &id, &token).await
            } else {
                job.run(&directory, &id, &token).await
            };
            tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            state
        });

        JobHandle { task_id, handle }
    }

    /// Ask a delivery task to stop before its next file.
    ///
    /// Returns `false` for ids that are not delivery tasks. Canceling twice,
    /// or canceling a finished task, is harmless.
    pub fn cancel(&self, task_id: &str) -> bool {
        let known = self
            .delivery_tracker
            .update(task_id, |s| s.status = TaskStatus::Canceled)
            .is_some();
        if !known {
            return false;
        }

        if let Some(token) = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
        {
            token.cancel();
        }
        debug!("Delivery {} marked canceled", task_id);
        true
    }

    // ── Polling ──────────────────────────────────────────────────────────

    /// Split percentage, 0 for unknown ids.
    pub fn get_progress(&self, task_id: &str) -> u8 {
        self.split_tracker.get(task_id).percent()
    }

    pub fn split_progress(&self, task_id: &str) -> Option<SplitProgress> {
        self.split_tracker.try_get(task_id)
    }

    pub fn get_delivery_state(&self, task_id: &str) -> Result<DeliveryState, DispatchError> {
        self.delivery_tracker
            .try_get(task_id)
            .ok_or_else(|| DispatchError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    // ── Reconciliation and export ────────────────────────────────────────

    /// Partition `directory` against the registry and cache the result.
    pub fn reconcile(&self, directory: &Path) -> Result<PartitionSets, DispatchError> {
        let sets = reconcile(directory, self.registry.as_ref())?;
        self.registry.store_partitions(&sets)?;
        Ok(sets)
    }

    /// ZIP archive of a delivery task's log and error trails.
    pub fn export_logs(&self, task_id: &str) -> Result<Vec<u8>, DispatchError> {
        export_archive(&self.get_delivery_state(task_id)?)
    }
}
