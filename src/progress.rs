//! Progress-callback trait for per-page split events.
//!
//! The splitter reports what it is doing through a
//! [`SplitProgressCallback`] and knows nothing about who listens: the
//! dispatcher forwards events into its [`ProgressTracker`] via
//! [`TrackerProgress`], the CLI drives a terminal progress bar.
//!
//! # Example
//!
//! ```rust
//! use payslip_dispatch::{PageOutcome, SplitProgressCallback};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl SplitProgressCallback for CountingCallback {
//!     fn on_page_processed(&self, _page: usize, _total: usize, outcome: &PageOutcome) {
//!         if matches!(outcome, PageOutcome::Written { .. }) {
//!             self.written.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::pipeline::split::SplitReport;
use crate::tracker::{page_percent, ProgressTracker, SplitProgress};
use std::path::PathBuf;
use std::sync::Arc;

/// What happened to one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// An encrypted single-page file was written.
    Written { path: PathBuf },
    /// The page did not yield a usable record.
    Skipped,
}

/// Called by the splitter as it walks the batch.
///
/// Called from a blocking worker thread, hence `Send + Sync`. All methods
/// default to no-ops.
pub trait SplitProgressCallback: Send + Sync {
    /// Called once the batch is open and its page count known.
    fn on_split_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each page, in page order.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in the batch
    /// * `outcome`     — whether a file was produced
    fn on_page_processed(&self, page_num: usize, total_pages: usize, outcome: &PageOutcome) {
        let _ = (page_num, total_pages, outcome);
    }

    /// Called once after the last page.
    fn on_split_complete(&self, report: &SplitReport) {
        let _ = report;
    }

    /// Called when the batch is abandoned. Files already written stay on disk.
    fn on_split_failed(&self, reason: &str) {
        let _ = reason;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SplitProgressCallback for NoopProgressCallback {}

/// Convenience alias for shared callbacks.
pub type ProgressCallback = Arc<dyn SplitProgressCallback>;

/// Forwards split events into a [`ProgressTracker`] entry.
pub struct TrackerProgress {
    tracker: Arc<ProgressTracker<SplitProgress>>,
    task_id: String,
}

impl TrackerProgress {
    pub fn new(tracker: Arc<ProgressTracker<SplitProgress>>, task_id: impl Into<String>) -> Self {
        Self {
            tracker,
            task_id: task_id.into(),
        }
    }
}

impl SplitProgressCallback for TrackerProgress {
    fn on_page_processed(&self, page_num: usize, total_pages: usize, _outcome: &PageOutcome) {
        let percent = page_percent(page_num, total_pages);
        self.tracker.update(&self.task_id, |p| p.advance(percent));
    }

    fn on_split_complete(&self, report: &SplitReport) {
        let done = SplitProgress::Completed {
            written: report.written.len(),
            skipped: report.skipped.len(),
        };
        self.tracker.update(&self.task_id, |p| *p = done);
    }

    fn on_split_failed(&self, reason: &str) {
        let failed = SplitProgress::Failed {
            reason: reason.to_string(),
        };
        self.tracker.update(&self.task_id, |p| *p = failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        total: AtomicUsize,
        written: AtomicUsize,
        skipped: AtomicUsize,
    }

    impl SplitProgressCallback for TrackingCallback {
        fn on_split_start(&self, total_pages: usize) {
            self.total.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_processed(&self, _page: usize, _total: usize, outcome: &PageOutcome) {
            match outcome {
                PageOutcome::Written { .. } => self.written.fetch_add(1, Ordering::SeqCst),
                PageOutcome::Skipped => self.skipped.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_split_start(3);
        cb.on_page_processed(1, 3, &PageOutcome::Skipped);
        cb.on_split_complete(&SplitReport::default());
        cb.on_split_failed("boom");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb = TrackingCallback {
            total: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        };
        cb.on_split_start(3);
        cb.on_page_processed(
            1,
            3,
            &PageOutcome::Written {
                path: PathBuf::from("out/1001_A_MAR-2023.pdf"),
            },
        );
        cb.on_page_processed(2, 3, &PageOutcome::Skipped);
        assert_eq!(cb.total.load(Ordering::SeqCst), 3);
        assert_eq!(cb.written.load(Ordering::SeqCst), 1);
        assert_eq!(cb.skipped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tracker_progress_updates_percent_then_completes() {
        let tracker = Arc::new(ProgressTracker::new());
        tracker.create("split-1", SplitProgress::default());
        let cb = TrackerProgress::new(Arc::clone(&tracker), "split-1");

        cb.on_page_processed(1, 3, &PageOutcome::Skipped);
        assert_eq!(tracker.get("split-1").percent(), 33);
        cb.on_page_processed(2, 3, &PageOutcome::Skipped);
        assert_eq!(tracker.get("split-1").percent(), 67);

        cb.on_split_complete(&SplitReport {
            total_pages: 3,
            written: vec![PathBuf::from("a.pdf")],
            skipped: vec![2, 3],
        });
        assert_eq!(
            tracker.get("split-1"),
            SplitProgress::Completed {
                written: 1,
                skipped: 2
            }
        );
    }

    #[test]
    fn tracker_progress_failure_reads_as_hundred() {
        let tracker = Arc::new(ProgressTracker::new());
        tracker.create("split-2", SplitProgress::default());
        let cb = TrackerProgress::new(Arc::clone(&tracker), "split-2");
        cb.on_split_failed("corrupt xref");
        let state = tracker.get("split-2");
        assert_eq!(state.percent(), 100);
        assert!(matches!(state, SplitProgress::Failed { .. }));
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_split_start(10);
    }
}
