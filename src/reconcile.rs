//! Three-way reconciliation of split files against the registry.
//!
//! ```text
//! active   = file ids ∩ registry ids
//! inactive = file ids − registry ids
//! unknown  = registry ids − file ids
//! ```
//!
//! File identifiers come from names alone (see [`crate::pipeline::naming`]).
//! Every registry row counts, whatever its `active` flag says.

use crate::error::DispatchError;
use crate::pipeline::naming::{identifier_of, list_pdf_files};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Name of one reconciliation partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// In the split-file directory and in the registry.
    Active,
    /// In the split-file directory only.
    Inactive,
    /// In the registry only.
    Unknown,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Active, Category::Inactive, Category::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Active => "active",
            Category::Inactive => "inactive",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Category::Active),
            "inactive" => Ok(Category::Inactive),
            "unknown" => Ok(Category::Unknown),
            other => Err(format!(
                "unknown category '{other}' (expected active, inactive or unknown)"
            )),
        }
    }
}

/// Result of one reconciliation. The three sets are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSets {
    pub active: BTreeSet<String>,
    pub inactive: BTreeSet<String>,
    pub unknown: BTreeSet<String>,
}

impl PartitionSets {
    pub fn get(&self, category: Category) -> &BTreeSet<String> {
        match category {
            Category::Active => &self.active,
            Category::Inactive => &self.inactive,
            Category::Unknown => &self.unknown,
        }
    }

    pub fn is_active(&self, identifier: &str) -> bool {
        self.active.contains(identifier)
    }
}

/// Pure set arithmetic over the two identifier sources.
pub fn partition(file_ids: &BTreeSet<String>, registry_ids: &BTreeSet<String>) -> PartitionSets {
    PartitionSets {
        active: file_ids.intersection(registry_ids).cloned().collect(),
        inactive: file_ids.difference(registry_ids).cloned().collect(),
        unknown: registry_ids.difference(file_ids).cloned().collect(),
    }
}

/// Identifiers encoded in the names of the `*.pdf` files directly in `directory`.
pub fn file_identifiers(directory: &Path) -> Result<BTreeSet<String>, DispatchError> {
    let names = list_pdf_files(directory).map_err(|source| DispatchError::DirectoryUnreadable {
        path: directory.to_path_buf(),
        source,
    })?;
    Ok(names
        .iter()
        .map(|name| identifier_of(name).to_string())
        .collect())
}

/// Reconcile `directory` against every identifier in `registry`.
pub fn reconcile(directory: &Path, registry: &dyn Registry) -> Result<PartitionSets, DispatchError> {
    let file_ids = file_identifiers(directory)?;
    let registry_ids: BTreeSet<String> = registry
        .find_all()?
        .into_iter()
        .map(|user| user.identifier)
        .collect();

    let sets = partition(&file_ids, &registry_ids);
    info!(
        "Reconciled '{}': {} active, {} inactive, {} unknown",
        directory.display(),
        sets.active.len(),
        sets.inactive.len(),
        sets.unknown.len()
    );
    Ok(sets)
}
