//! Split-file naming grammar and per-file password derivation.
//!
//! A split file is named `{identifier}_{surname}_{month}-{year}.pdf`. The
//! reconciler and the delivery job recover the identifier from the name
//! alone, so construction and parsing must agree:
//!
//! ```text
//! file-name  := identifier "_" rest
//! identifier := one or more chars, none of them "_" or a path separator
//! ```
//!
//! Names that would break that grammar (an identifier containing `_`, or any
//! field containing a path separator) are rejected when the file is created.

use crate::pipeline::template::ExtractedRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;

/// Identifier token: anything up to the first `_`, no path separators.
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^_/\\]+$").unwrap());

/// Extension every split file carries. Matching is case-sensitive on read.
pub const PDF_EXTENSION: &str = ".pdf";

/// Why an extracted record cannot be turned into a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameRejected {
    Identifier(String),
    Field { field: &'static str, value: String },
}

impl fmt::Display for NameRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameRejected::Identifier(id) => {
                write!(f, "identifier '{id}' contains '_' or a path separator")
            }
            NameRejected::Field { field, value } => {
                write!(f, "{field} '{value}' contains a path separator")
            }
        }
    }
}

/// A validated split-file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFileName {
    record: ExtractedRecord,
}

impl SplitFileName {
    pub fn identifier(&self) -> &str {
        &self.record.identifier
    }

    /// Password protecting this file: first two characters of the surname
    /// followed by the last two characters of the identifier, case as extracted.
    pub fn password(&self) -> String {
        derive_password(&self.record)
    }
}

impl TryFrom<&ExtractedRecord> for SplitFileName {
    type Error = NameRejected;

    fn try_from(record: &ExtractedRecord) -> Result<Self, Self::Error> {
        if !IDENTIFIER.is_match(&record.identifier) {
            return Err(NameRejected::Identifier(record.identifier.clone()));
        }
        for (field, value) in [
            ("surname", &record.surname),
            ("month", &record.month),
            ("year", &record.year),
        ] {
            if value.contains(['/', '\\']) {
                return Err(NameRejected::Field {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(Self {
            record: record.clone(),
        })
    }
}

impl fmt::Display for SplitFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.record;
        write!(
            f,
            "{}_{}_{}-{}{}",
            r.identifier, r.surname, r.month, r.year, PDF_EXTENSION
        )
    }
}

/// `surname[0..2] + identifier[-2..]`, counted in characters.
pub fn derive_password(record: &ExtractedRecord) -> String {
    let head: String = record.surname.chars().take(2).collect();
    let id_len = record.identifier.chars().count();
    let tail: String = record
        .identifier
        .chars()
        .skip(id_len.saturating_sub(2))
        .collect();
    format!("{head}{tail}")
}

/// Identifier encoded in a split-file name: the text before the first `_`,
/// or the whole name when it has none.
pub fn identifier_of(file_name: &str) -> &str {
    file_name.split('_').next().unwrap_or(file_name)
}

/// Whether a directory entry name is a split file candidate.
pub fn is_pdf_name(file_name: &str) -> bool {
    file_name.ends_with(PDF_EXTENSION)
}

/// Names of the `*.pdf` regular files directly inside `dir`, in directory
/// listing order.
pub fn list_pdf_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_pdf_name(name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identifier: &str, surname: &str) -> ExtractedRecord {
        ExtractedRecord {
            identifier: identifier.into(),
            surname: surname.into(),
            month: "MAR".into(),
            year: "2023".into(),
        }
    }

    #[test]
    fn file_name_layout() {
        let name = SplitFileName::try_from(&record("482427", "ARAF")).unwrap();
        assert_eq!(name.to_string(), "482427_ARAF_MAR-2023.pdf");
    }

    #[test]
    fn identifier_round_trips_through_file_name() {
        for id in ["1001", "ab-12", "X"] {
            let name = SplitFileName::try_from(&record(id, "OKAFOR")).unwrap();
            assert_eq!(identifier_of(&name.to_string()), id);
        }
    }

    #[test]
    fn identifier_with_underscore_is_rejected() {
        let err = SplitFileName::try_from(&record("10_01", "ARAF")).unwrap_err();
        assert_eq!(err, NameRejected::Identifier("10_01".into()));
    }

    #[test]
    fn path_separator_in_surname_is_rejected() {
        let err = SplitFileName::try_from(&record("1001", "../ARAF")).unwrap_err();
        assert!(matches!(err, NameRejected::Field { field: "surname", .. }));
    }

    #[test]
    fn password_takes_surname_head_and_identifier_tail() {
        assert_eq!(derive_password(&record("482427", "ARAF")), "AR27");
        assert_eq!(derive_password(&record("7", "Okafor")), "Ok7");
        assert_eq!(derive_password(&record("1001", "O")), "O01");
    }

    #[test]
    fn password_counts_characters_not_bytes() {
        assert_eq!(derive_password(&record("12É4", "ÉLAN")), "ÉLÉ4");
    }

    #[test]
    fn identifier_of_without_underscore_is_whole_name() {
        assert_eq!(identifier_of("summary.pdf"), "summary.pdf");
        assert_eq!(identifier_of("1001_ARAF_MAR-2023.pdf"), "1001");
    }

    #[test]
    fn list_pdf_files_skips_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1001_A_MAR-2023.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("UPPER.PDF"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("success_mail.pdf")).unwrap();

        let names = list_pdf_files(dir.path()).unwrap();
        assert_eq!(names, vec!["1001_A_MAR-2023.pdf".to_string()]);
    }
}
