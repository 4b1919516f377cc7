//! In-process task state, keyed by task id and polled by clients.
//!
//! [`ProgressTracker`] is a guarded map: the job that owns a task id mutates
//! its entry through [`ProgressTracker::update`], pollers receive clones.
//! Nothing is persisted; state disappears with the process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Process-wide mapping from task id to a state record.
#[derive(Debug, Default)]
pub struct ProgressTracker<S> {
    tasks: RwLock<HashMap<String, S>>,
}

impl<S: Clone + Default> ProgressTracker<S> {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert (or reset) the state for `task_id`.
    pub fn create(&self, task_id: impl Into<String>, initial: S) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.into(), initial);
    }

    /// Snapshot of the state, or `S::default()` for an unknown id.
    pub fn get(&self, task_id: &str) -> S {
        self.try_get(task_id).unwrap_or_default()
    }

    pub fn try_get(&self, task_id: &str) -> Option<S> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned()
    }

    /// Apply `mutator` to the entry under the write lock. `None` if the id is unknown.
    pub fn update<R>(&self, task_id: &str, mutator: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(task_id)
            .map(mutator)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }

    pub fn remove(&self, task_id: &str) -> Option<S> {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

// ── Split state ──────────────────────────────────────────────────────────

/// Where a split task stands.
///
/// Both terminal variants report 100 percent, but unlike a bare percentage a
/// poller can tell a finished batch from an aborted one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SplitProgress {
    Running { percent: u8 },
    Completed { written: usize, skipped: usize },
    Failed { reason: String },
}

impl Default for SplitProgress {
    fn default() -> Self {
        SplitProgress::Running { percent: 0 }
    }
}

impl SplitProgress {
    pub fn percent(&self) -> u8 {
        match self {
            SplitProgress::Running { percent } => *percent,
            SplitProgress::Completed { .. } | SplitProgress::Failed { .. } => 100,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, SplitProgress::Running { .. })
    }

    /// Move a running task forward; never lowers the percentage and never
    /// reopens a finished task.
    pub fn advance(&mut self, percent: u8) {
        if let SplitProgress::Running { percent: current } = self {
            *current = (*current).max(percent.min(100));
        }
    }
}

/// `round(done / total * 100)`, and 100 for an empty batch.
pub fn page_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

// ── Delivery state ───────────────────────────────────────────────────────

/// Cooperative run flag for a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Running,
    Canceled,
}

/// One processed file, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
    pub file: String,
    pub email: String,
}

/// One failed file (or job-level setup failure, with an empty `file`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub file: String,
    pub email: String,
    pub error: String,
}

/// Counters and audit trail of a delivery task.
///
/// `completed` means the worker has exited, not that every file was sent:
/// a canceled run also ends with `completed == true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<ErrorEntry>,
    pub status: TaskStatus,
    pub completed: bool,
}

/// One page of a longer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: usize,
    /// Number of pages, at least 1 even for an empty list.
    pub pages: usize,
}

impl<T: Clone> Paginated<T> {
    /// `page` is 1-based; page 0 is treated as page 1.
    pub fn slice(all: &[T], page: usize, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let start = page.max(1).saturating_sub(1).saturating_mul(per_page);
        let items = all.iter().skip(start).take(per_page).cloned().collect();
        Self {
            items,
            total: all.len(),
            pages: all.len().div_ceil(per_page).max(1),
        }
    }
}

impl DeliveryState {
    pub fn is_canceled(&self) -> bool {
        self.status == TaskStatus::Canceled
    }

    /// Files handled so far.
    pub fn processed(&self) -> usize {
        self.sent + self.failed
    }

    pub fn logs_page(&self, page: usize, per_page: usize) -> Paginated<LogEntry> {
        Paginated::slice(&self.logs, page, per_page)
    }

    pub fn errors_page(&self, page: usize, per_page: usize) -> Paginated<ErrorEntry> {
        Paginated::slice(&self.errors, page, per_page)
    }
}
