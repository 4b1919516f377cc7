//! Error types for the payslip-dispatch library.
//!
//! Errors are split by how much work they take down with them:
//!
//! * [`DispatchError`] — **Fatal** for one operation: the source PDF is
//!   missing or corrupt, the output directory cannot be written, the registry
//!   is unreachable. Returned as `Err(DispatchError)` from the splitter, the
//!   reconciler and the job handles.
//!
//! * [`DeliveryError`] — **Non-fatal**: one file could not be delivered but the
//!   rest of the run continues. Stored as text in the task's error trail so a
//!   poller sees which employee was affected and why.
//!
//! * [`TransportError`] — what a [`crate::mail::MailTransport`] reports. The
//!   transient/permanent split is what lets the mailer stop retrying a message
//!   that can never succeed.
//!
//! * [`RegistryError`] — failures of the user registry backend.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the payslip-dispatch library.
///
/// Per-file delivery failures use [`DeliveryError`] and are recorded in
/// [`crate::tracker::DeliveryState`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DispatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The source batch is itself encrypted; the splitter only reads plain batches.
    #[error("PDF '{path}' is encrypted.\nDecrypt the batch first, e.g. qpdf --decrypt input.pdf output.pdf")]
    PasswordRequired { path: PathBuf },

    /// A single page could not be isolated or encrypted.
    #[error("Encryption failed for page {page}: {detail}")]
    EncryptionFailed { page: u32, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, clear or write into an output location.
    #[error("Failed to write '{path}': {detail}")]
    OutputWriteFailed { path: PathBuf, detail: String },

    /// Could not list a split-file directory.
    #[error("Failed to read directory '{path}': {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Registry errors ───────────────────────────────────────────────────
    #[error(transparent)]
    Registry(#[from] RegistryError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Task errors ───────────────────────────────────────────────────────
    /// No task with this id is known to the dispatcher.
    #[error("Unknown task '{task_id}'")]
    TaskNotFound { task_id: String },

    /// Export archive could not be assembled.
    #[error("Failed to build export archive: {0}")]
    ExportFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panic, join failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single split file during delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DeliveryError {
    /// Network or server hiccup; another attempt may succeed.
    #[error("transient transport failure: {detail}")]
    Transient { detail: String },

    /// The server rejected the message for good (bad address, policy).
    #[error("permanent transport failure: {detail}")]
    Permanent { detail: String },

    /// The attachment is not a PDF or is not a readable file.
    #[error("attachment '{path}' is not a PDF file or does not exist")]
    MissingAttachment { path: PathBuf },

    /// The file's identifier has no row in the registry.
    #[error("no registry entry for identifier '{identifier}'")]
    RecipientNotFound { identifier: String },

    /// Recipient, identifier or file name was empty.
    #[error("missing information for email notification")]
    IncompleteMessage,
}

impl DeliveryError {
    /// Whether retrying the same send could produce a different result.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }
}

impl From<TransportError> for DeliveryError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Transient(detail) => DeliveryError::Transient { detail },
            TransportError::Permanent(detail) => DeliveryError::Permanent { detail },
        }
    }
}

/// Failure reported by a mail transport for one message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection drop, timeout, 4xx reply.
    #[error("{0}")]
    Transient(String),
    /// 5xx reply, malformed address, unbuildable message.
    #[error("{0}")]
    Permanent(String),
}

/// Failures of a [`crate::registry::Registry`] backend.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Another user already holds this identifier or email.
    #[error("registry already has a user with {field} '{value}'")]
    Duplicate { field: &'static str, value: String },

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}
