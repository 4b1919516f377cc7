//! Page-text parsing: turn one payslip page's text into an [`ExtractedRecord`].
//!
//! The payroll batches this tool handles put the employee block on fixed
//! lines near the top of every page:
//!
//! ```text
//! line 4   MAR-2023                      <month>-...-<year>
//! line 5   Name: ARAF, MUSA               <label>: <surname>, <given names>
//! line 6   IPPIS Number: 482427           <label>: <identifier>
//! ```
//!
//! Some exports wrap the identifier onto line 7 instead, in which case line 6
//! carries no `:` and the identifier is read from line 7 of the page.
//!
//! Parsing is best-effort: a page that does not fit the layout yields `None`
//! and the splitter skips it. Nothing in here returns an error or panics.
//!
//! The layout lives behind [`PayslipTemplate`] so a second document template
//! can be added without touching the splitter.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Employee fields recovered from one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub identifier: String,
    pub surname: String,
    pub month: String,
    pub year: String,
}

/// A document layout that knows where the employee fields sit on a page.
///
/// Implementations must be `Send + Sync`: the splitter runs on a blocking
/// worker thread and the template is shared through an `Arc`.
pub trait PayslipTemplate: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Parse one page's extracted text. `None` means "no usable record".
    fn extract(&self, page_text: &str) -> Option<ExtractedRecord>;
}

/// The single payslip layout observed in production batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardTemplate {
    /// 0-based index of the first line of the three-line employee block.
    pub window_start: usize,
    /// 0-based page line holding the identifier when the block's last line has no `:`.
    pub fallback_identifier_line: usize,
}

impl Default for StandardTemplate {
    fn default() -> Self {
        Self {
            window_start: 3,
            fallback_identifier_line: 6,
        }
    }
}

/// Why a page did not parse. Only surfaced in debug logs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Miss {
    TooFewLines(usize),
    NoSurnameLabel,
    NoFallbackLine,
    EmptyIdentifier,
    EmptySurname,
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Miss::TooFewLines(n) => write!(f, "page has only {n} lines"),
            Miss::NoSurnameLabel => write!(f, "surname line has no ':'"),
            Miss::NoFallbackLine => write!(f, "identifier fallback line is missing"),
            Miss::EmptyIdentifier => write!(f, "identifier is empty"),
            Miss::EmptySurname => write!(f, "surname is empty"),
        }
    }
}

impl StandardTemplate {
    fn parse(&self, page_text: &str) -> Result<ExtractedRecord, Miss> {
        let lines: Vec<&str> = page_text.split('\n').collect();
        let window = lines
            .get(self.window_start..self.window_start + 3)
            .ok_or(Miss::TooFewLines(lines.len()))?;

        let dates: Vec<&str> = window[0].trim().split('-').collect();
        let month = dates.first().copied().unwrap_or_default();
        let year = dates.last().copied().unwrap_or_default();

        let surname = window[1]
            .split(':')
            .nth(1)
            .ok_or(Miss::NoSurnameLabel)?
            .split(',')
            .next()
            .unwrap_or_default()
            .trim();

        let identifier_line = if window[2].contains(':') {
            window[2]
        } else {
            lines
                .get(self.fallback_identifier_line)
                .copied()
                .ok_or(Miss::NoFallbackLine)?
        };
        let identifier = identifier_line.rsplit(':').next().unwrap_or_default().trim();

        if identifier.is_empty() {
            return Err(Miss::EmptyIdentifier);
        }
        if surname.is_empty() {
            return Err(Miss::EmptySurname);
        }

        Ok(ExtractedRecord {
            identifier: identifier.to_string(),
            surname: surname.to_string(),
            month: month.to_string(),
            year: year.to_string(),
        })
    }
}

impl PayslipTemplate for StandardTemplate {
    fn name(&self) -> &str {
        "standard"
    }

    fn extract(&self, page_text: &str) -> Option<ExtractedRecord> {
        match self.parse(page_text) {
            Ok(record) => Some(record),
            Err(miss) => {
                debug!("template '{}': no record ({})", self.name(), miss);
                None
            }
        }
    }
}
