//! SQLite-backed registry.
//!
//! Two tables: `users` (the registry proper) and `partitions`, a cache of
//! the last reconciliation that [`Registry::store_partitions`] overwrites in
//! one transaction. The cache is derived data and safe to drop.

use super::{Registry, RegistryUser};
use crate::error::RegistryError;
use crate::reconcile::{Category, PartitionSets};
use crate::tracker::Paginated;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier  TEXT NOT NULL UNIQUE,
    email       TEXT NOT NULL UNIQUE,
    first_name  TEXT,
    surname     TEXT,
    phone       TEXT,
    active      INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS partitions (
    category    TEXT NOT NULL,
    identifier  TEXT NOT NULL,
    PRIMARY KEY (category, identifier)
);";

const USER_SELECT_SQL: &str =
    "SELECT identifier, email, first_name, surname, phone, active FROM users";

/// Registry stored in a single SQLite file.
#[derive(Debug)]
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened registry database '{}'", path.display());
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One page of a cached partition, identifiers in ascending order.
    pub fn cached_partition(
        &self,
        category: Category,
        page: usize,
        per_page: usize,
    ) -> Result<Paginated<String>, RegistryError> {
        let per_page = per_page.max(1);
        let offset = page.max(1).saturating_sub(1).saturating_mul(per_page);
        let conn = self.conn();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM partitions WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT identifier FROM partitions
             WHERE category = ?1
             ORDER BY identifier
             LIMIT ?2 OFFSET ?3",
        )?;
        let items = stmt
            .query_map(
                params![category.as_str(), per_page as i64, offset as i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let total = total.max(0) as usize;
        Ok(Paginated {
            items,
            total,
            pages: total.div_ceil(per_page).max(1),
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<RegistryUser> {
    Ok(RegistryUser {
        identifier: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        surname: row.get(3)?,
        phone: row.get(4)?,
        active: row.get(5)?,
    })
}

/// Turn a UNIQUE violation into [`RegistryError::Duplicate`].
fn map_insert_error(err: rusqlite::Error, user: &RegistryUser) -> RegistryError {
    match &err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) if e.code == ErrorCode::ConstraintViolation => {
            if msg.contains("users.email") {
                RegistryError::Duplicate {
                    field: "email",
                    value: user.email.clone(),
                }
            } else {
                RegistryError::Duplicate {
                    field: "identifier",
                    value: user.identifier.clone(),
                }
            }
        }
        _ => RegistryError::Storage(err),
    }
}

impl Registry for SqliteRegistry {
    fn find_all(&self) -> Result<Vec<RegistryUser>, RegistryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{USER_SELECT_SQL} ORDER BY id"))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn find_by_identifier(&self, identifier: &str) -> Result<Option<RegistryUser>, RegistryError> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE identifier = ?1"),
                params![identifier],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn insert_many(&self, users: &[RegistryUser]) -> Result<usize, RegistryError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO users (identifier, email, first_name, surname, phone, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for user in users {
                stmt.execute(params![
                    user.identifier,
                    user.email,
                    user.first_name,
                    user.surname,
                    user.phone,
                    user.active,
                ])
                .map_err(|e| map_insert_error(e, user))?;
            }
        }
        tx.commit()?;
        debug!("Inserted {} registry users", users.len());
        Ok(users.len())
    }

    fn remove(&self, key: &str) -> Result<Option<RegistryUser>, RegistryError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let user = tx
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE identifier = ?1 OR email = ?1 LIMIT 1"),
                params![key],
                user_from_row,
            )
            .optional()?;
        if let Some(user) = &user {
            tx.execute(
                "DELETE FROM users WHERE identifier = ?1",
                params![user.identifier],
            )?;
        }
        tx.commit()?;
        Ok(user)
    }

    fn store_partitions(&self, partitions: &PartitionSets) -> Result<(), RegistryError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM partitions", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO partitions (category, identifier) VALUES (?1, ?2)")?;
            for category in Category::ALL {
                for identifier in partitions.get(category) {
                    stmt.execute(params![category.as_str(), identifier])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn seeded() -> SqliteRegistry {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry
            .insert_many(&[
                RegistryUser::new("1001", "a@x.com")
                    .with_name("Musa", "Araf")
                    .with_active(true),
                RegistryUser::new("1003", "c@x.com").with_phone("0800"),
            ])
            .unwrap();
        registry
    }

    #[test]
    fn round_trips_users() {
        let registry = seeded();
        let all = registry.find_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].identifier, "1001");
        assert!(all[0].active);
        assert_eq!(all[1].phone.as_deref(), Some("0800"));

        let user = registry.find_by_identifier("1001").unwrap().unwrap();
        assert_eq!(user.surname.as_deref(), Some("Araf"));
        assert!(registry.find_by_identifier("9999").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_rolls_back_batch() {
        let registry = seeded();
        let err = registry
            .insert_many(&[
                RegistryUser::new("2000", "new@x.com"),
                RegistryUser::new("2001", "a@x.com"),
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { field: "email", .. }));
        assert!(registry.find_by_identifier("2000").unwrap().is_none());
    }

    #[test]
    fn duplicate_identifier_is_reported() {
        let registry = seeded();
        let err = registry
            .insert_many(&[RegistryUser::new("1001", "other@x.com")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { field: "identifier", .. }));
    }

    #[test]
    fn remove_by_email() {
        let registry = seeded();
        let removed = registry.remove("c@x.com").unwrap().unwrap();
        assert_eq!(removed.identifier, "1003");
        assert!(registry.remove("c@x.com").unwrap().is_none());
        assert_eq!(registry.find_all().unwrap().len(), 1);
    }

    #[test]
    fn partitions_are_overwritten_and_paginated() {
        let registry = seeded();
        let first = PartitionSets {
            active: (0..5).map(|i| format!("{i:04}")).collect(),
            inactive: BTreeSet::from(["9000".to_string()]),
            unknown: BTreeSet::new(),
        };
        registry.store_partitions(&first).unwrap();

        let page = registry.cached_partition(Category::Active, 2, 2).unwrap();
        assert_eq!(page.items, vec!["0002".to_string(), "0003".to_string()]);
        assert_eq!(page.total, 5);
        assert_eq!(page.pages, 3);

        let second = PartitionSets {
            unknown: BTreeSet::from(["1003".to_string()]),
            ..Default::default()
        };
        registry.store_partitions(&second).unwrap();
        assert_eq!(registry.cached_partition(Category::Active, 1, 100).unwrap().total, 0);
        let unknown = registry.cached_partition(Category::Unknown, 1, 100).unwrap();
        assert_eq!(unknown.items, vec!["1003".to_string()]);
        assert_eq!(unknown.pages, 1);
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        SqliteRegistry::open(&path)
            .unwrap()
            .insert_many(&[RegistryUser::new("1001", "a@x.com")])
            .unwrap();
        let reopened = SqliteRegistry::open(&path).unwrap();
        assert_eq!(reopened.find_all().unwrap().len(), 1);
    }
}
