//! DocumentSplitter: one encrypted single-page PDF per recognised payslip.
//!
//! lopdf is synchronous and the per-page work is CPU-bound, so the async
//! entry point moves the whole batch onto `spawn_blocking`. Progress flows
//! out through a [`SplitProgressCallback`] after every page.

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::pipeline::encrypt::{encrypt_with_password, isolate_page};
use crate::pipeline::naming::SplitFileName;
use crate::pipeline::source::{load_document, page_numbers, page_text, resolve_source};
use crate::pipeline::template::PayslipTemplate;
use crate::progress::{PageOutcome, SplitProgressCallback};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a finished split produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitReport {
    pub total_pages: usize,
    /// Files written, in page order. Name collisions appear twice.
    pub written: Vec<PathBuf>,
    /// 1-based numbers of pages that yielded no file.
    pub skipped: Vec<u32>,
}

/// Splits a payslip batch into per-employee encrypted files.
#[derive(Clone)]
pub struct DocumentSplitter {
    template: Arc<dyn PayslipTemplate>,
    page_delay: Duration,
}

impl DocumentSplitter {
    pub fn new(template: Arc<dyn PayslipTemplate>, page_delay: Duration) -> Self {
        Self {
            template,
            page_delay,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(Arc::clone(&config.template), config.page_delay())
    }

    /// Split `source` into `output_dir`.
    ///
    /// `output_dir` is deleted and recreated once the source has been
    /// validated. On a fatal error the files already written stay in place
    /// and `progress` receives `on_split_failed`.
    pub async fn split(
        &self,
        source: &Path,
        output_dir: &Path,
        progress: Arc<dyn SplitProgressCallback>,
    ) -> Result<SplitReport, DispatchError> {
        let splitter = self.clone();
        let source = source.to_path_buf();
        let output_dir = output_dir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            splitter.split_blocking(&source, &output_dir, progress.as_ref())
        })
        .await
        .map_err(|e| DispatchError::Internal(format!("Split task panicked: {}", e)))?
    }

    /// Blocking implementation of [`split`](Self::split).
    pub fn split_blocking(
        &self,
        source: &Path,
        output_dir: &Path,
        progress: &dyn SplitProgressCallback,
    ) -> Result<SplitReport, DispatchError> {
        match self.run(source, output_dir, progress) {
            Ok(report) => {
                info!(
                    "Split complete: {} files from {} pages ({} skipped)",
                    report.written.len(),
                    report.total_pages,
                    report.skipped.len()
                );
                progress.on_split_complete(&report);
                Ok(report)
            }
            Err(e) => {
                warn!("Split of '{}' aborted: {}", source.display(), e);
                progress.on_split_failed(&e.to_string());
                Err(e)
            }
        }
    }

    fn run(
        &self,
        source: &Path,
        output_dir: &Path,
        progress: &dyn SplitProgressCallback,
    ) -> Result<SplitReport, DispatchError> {
        let source = resolve_source(source)?;
        let document = load_document(&source)?;
        reset_dir(output_dir)?;

        let pages = page_numbers(&document);
        let total = pages.len();
        info!(
            "Splitting '{}' ({} pages, template '{}')",
            source.display(),
            total,
            self.template.name()
        );
        progress.on_split_start(total);

        let mut report = SplitReport {
            total_pages: total,
            ..Default::default()
        };

        for (i, &page_number) in pages.iter().enumerate() {
            let outcome = match self.split_page(&document, page_number, output_dir)? {
                Some(path) => {
                    report.written.push(path.clone());
                    PageOutcome::Written { path }
                }
                None => {
                    report.skipped.push(page_number);
                    PageOutcome::Skipped
                }
            };
            progress.on_page_processed(i + 1, total, &outcome);

            if !self.page_delay.is_zero() {
                std::thread::sleep(self.page_delay);
            }
        }

        Ok(report)
    }

    /// Write one page. `Ok(None)` means the page carries no usable record.
    fn split_page(
        &self,
        document: &lopdf::Document,
        page_number: u32,
        output_dir: &Path,
    ) -> Result<Option<PathBuf>, DispatchError> {
        let Some(record) = page_text(document, page_number)
            .and_then(|text| self.template.extract(&text))
        else {
            debug!("Page {}: no payslip record, skipped", page_number);
            return Ok(None);
        };

        let name = match SplitFileName::try_from(&record) {
            Ok(name) => name,
            Err(rejected) => {
                warn!("Page {}: skipped, {}", page_number, rejected);
                return Ok(None);
            }
        };

        let file_name = name.to_string();
        let path = output_dir.join(&file_name);

        let Some(mut single) = isolate_page(document, page_number) else {
            warn!("Page {}: not found in page tree, skipped", page_number);
            return Ok(None);
        };
        encrypt_with_password(&mut single, &name.password(), &file_name).map_err(|e| {
            DispatchError::EncryptionFailed {
                page: page_number,
                detail: e.to_string(),
            }
        })?;
        single
            .save(&path)
            .map_err(|e| DispatchError::OutputWriteFailed {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        debug!("Page {}: wrote {}", page_number, file_name);
        Ok(Some(path))
    }
}

/// Remove `dir` with everything in it and create it empty.
fn reset_dir(dir: &Path) -> Result<(), DispatchError> {
    let write_failed = |e: std::io::Error| DispatchError::OutputWriteFailed {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    };
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(write_failed)?;
    }
    std::fs::create_dir_all(dir).map_err(write_failed)
}
