//! User registry: who may receive payslips, and at which address.
//!
//! The splitter never looks at the registry. The reconciler reads every
//! identifier from it and the delivery job looks up one recipient per file.
//! Two backends ship with the crate: [`MemoryRegistry`] for tests and
//! embedding, [`sqlite::SqliteRegistry`] for the CLI.

pub mod sqlite;

use crate::error::RegistryError;
use crate::reconcile::PartitionSets;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

pub use sqlite::SqliteRegistry;

/// One employee row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryUser {
    /// Payroll identifier, unique.
    pub identifier: String,
    /// Delivery address, unique.
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Informational. Reconciliation ignores it.
    #[serde(default)]
    pub active: bool,
}

impl RegistryUser {
    pub fn new(identifier: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            email: email.into(),
            first_name: None,
            surname: None,
            phone: None,
            active: false,
        }
    }

    pub fn with_name(mut self, first_name: impl Into<String>, surname: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self.surname = Some(surname.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Storage behind reconciliation and recipient lookup.
///
/// Calls are synchronous; backends are expected to answer from local
/// storage. Implementations must be `Send + Sync` to be shared by jobs.
pub trait Registry: Send + Sync {
    fn find_all(&self) -> Result<Vec<RegistryUser>, RegistryError>;

    fn find_by_identifier(&self, identifier: &str) -> Result<Option<RegistryUser>, RegistryError>;

    /// Insert all of `users` or none of them. Returns the number inserted.
    fn insert_many(&self, users: &[RegistryUser]) -> Result<usize, RegistryError>;

    /// Remove the user whose identifier or email equals `key`.
    fn remove(&self, key: &str) -> Result<Option<RegistryUser>, RegistryError>;

    /// Overwrite the cached result of the last reconciliation.
    fn store_partitions(&self, partitions: &PartitionSets) -> Result<(), RegistryError> {
        let _ = partitions;
        Ok(())
    }
}

/// Registry held in process memory, keyed by identifier.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    users: RwLock<BTreeMap<String, RegistryUser>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries replace earlier ones with the same identifier.
    pub fn with_users(users: impl IntoIterator<Item = RegistryUser>) -> Self {
        let users = users
            .into_iter()
            .map(|u| (u.identifier.clone(), u))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }
}

impl Registry for MemoryRegistry {
    fn find_all(&self) -> Result<Vec<RegistryUser>, RegistryError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.values().cloned().collect())
    }

    fn find_by_identifier(&self, identifier: &str) -> Result<Option<RegistryUser>, RegistryError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        Ok(users.get(identifier).cloned())
    }

    fn insert_many(&self, new_users: &[RegistryUser]) -> Result<usize, RegistryError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);

        for (i, user) in new_users.iter().enumerate() {
            let earlier = &new_users[..i];
            if users.contains_key(&user.identifier)
                || earlier.iter().any(|u| u.identifier == user.identifier)
            {
                return Err(RegistryError::Duplicate {
                    field: "identifier",
                    value: user.identifier.clone(),
                });
            }
            if users.values().any(|u| u.email == user.email)
                || earlier.iter().any(|u| u.email == user.email)
            {
                return Err(RegistryError::Duplicate {
                    field: "email",
                    value: user.email.clone(),
                });
            }
        }

        for user in new_users {
            users.insert(user.identifier.clone(), user.clone());
        }
        Ok(new_users.len())
    }

    fn remove(&self, key: &str) -> Result<Option<RegistryUser>, RegistryError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let identifier = users
            .values()
            .find(|u| u.identifier == key || u.email == key)
            .map(|u| u.identifier.clone());
        Ok(identifier.and_then(|id| users.remove(&id)))
    }
}
