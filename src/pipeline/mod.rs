//! Pipeline stages for splitting a payslip batch.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the page layout can change without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ template ──▶ naming ──▶ encrypt ──▶ split
//! (lopdf)    (fields)    (file name,  (isolate,   (drives the batch,
//!                         password)    RC4 128)    reports progress)
//! ```
//!
//! 1. [`source`]   — validate the batch path, load it, extract page text
//! 2. [`template`] — pull identifier, surname and pay period out of page text
//! 3. [`naming`]   — the `{identifier}_{surname}_{month}-{year}.pdf` grammar
//!    and per-file password
//! 4. [`encrypt`]  — reduce the batch to one page and password-protect it
//! 5. [`split`]    — walk every page on a blocking thread; the only stage that
//!    writes to disk

pub mod encrypt;
pub mod naming;
pub mod source;
pub mod split;
pub mod template;

#[cfg(test)]
pub(crate) mod fixtures;
