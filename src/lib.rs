//! # payslip-dispatch
//!
//! Split payslip PDF batches into per-employee encrypted files and mail each
//! file to its owner.
//!
//! ## Why this crate?
//!
//! Payroll batches arrive as one long PDF with one payslip per page. Sending
//! them by hand means cutting pages, protecting each one and matching it to an
//! address book. This crate reads the text of every page, names and encrypts
//! a single-page file per employee, reconciles the files against a registry
//! of known recipients and mails the matching ones, keeping an audit trail of
//! what went where.
//!
//! ## Pipeline Overview
//!
//! ```text
//! batch.pdf
//!  │
//!  ├─ 1. Split      one encrypted PDF per recognised page (spawn_blocking)
//!  ├─ 2. Reconcile  file ids vs registry ids → active / inactive / unknown
//!  ├─ 3. Deliver    mail every active file, retry, sort into success/failed
//!  ├─ 4. Retry      re-send failed files, then files never attempted
//!  └─ 5. Export     logs.csv + errors.csv in a ZIP
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use payslip_dispatch::{
//!     DispatchConfig, Dispatcher, SmtpConfig, SmtpTransport, SqliteRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(SqliteRegistry::open("registry.db")?);
//!     let transport = Arc::new(SmtpTransport::new(&SmtpConfig::new(
//!         "smtp.example.org",
//!         "payroll@example.org",
//!         "app-password",
//!     ))?);
//!     let dispatcher = Dispatcher::new(DispatchConfig::default(), registry, transport);
//!
//!     dispatcher.start_split("batch.pdf", "split").wait().await?;
//!     let state = dispatcher.start_delivery("split").wait().await?;
//!     eprintln!("{}/{} sent, {} failed", state.sent, state.total, state.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `payslip` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! payslip-dispatch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod delivery;
pub mod error;
pub mod export;
pub mod jobs;
pub mod mail;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod registry;
pub mod tracker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DispatchConfig, DispatchConfigBuilder, SmtpConfig};
pub use delivery::DeliveryJob;
pub use error::{DeliveryError, DispatchError, RegistryError, TransportError};
pub use export::{errors_csv, export_archive, logs_csv};
pub use jobs::{Dispatcher, JobHandle};
pub use mail::{DryRunTransport, MailTransport, Mailer, OutgoingMail, SendOutcome, SmtpTransport};
pub use pipeline::split::{DocumentSplitter, SplitReport};
pub use pipeline::template::{ExtractedRecord, PayslipTemplate, StandardTemplate};
pub use progress::{NoopProgressCallback, PageOutcome, ProgressCallback, SplitProgressCallback, TrackerProgress};
pub use reconcile::{Category, PartitionSets};
pub use registry::{MemoryRegistry, Registry, RegistryUser, SqliteRegistry};
pub use tracker::{DeliveryState, ErrorEntry, LogEntry, Paginated, ProgressTracker, SplitProgress, TaskStatus};
