//! SQLite persistence for the local replica.
//!
//! [`Database`] owns the one connection shared by the exporter, the
//! preferences store, the repository projection, and the audit log. Typed
//! entity queries live in [`queries`], the snapshot projection in
//! [`repository`], and migrations in [`schema`].

pub mod queries;
pub mod repository;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::errors::DatabaseError;

pub use queries::{AuditLogEntry, CredentialRow, TagRow, VariableRow, WorkflowRow};
pub use repository::EntityRepository;

/// Pragmas applied to every connection. Credential shares and tag mappings
/// rely on cascading foreign keys.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Handle to the entity database.
pub struct Database {
    conn: Mutex<Connection>,
    /// `None` for in-memory databases.
    path: Option<PathBuf>,
}

impl Database {
    /// Open the database configured under `[database]`, creating its parent
    /// directory when needed.
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(&config.path)
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let journal: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        info!(path = %path.display(), journal = %journal, "opened entity database");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private database that lives as long as the handle.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// File backing the database, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply pending migrations and return the resulting schema version.
    pub fn initialize(&self) -> Result<u32, DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        let version = schema::get_schema_version(&conn)?;
        debug!(version, in_memory = self.path.is_none(), "entity schema ready");
        Ok(version)
    }

    /// Lock the shared connection. A poisoned lock is taken over, since every
    /// multi-statement write runs inside [`Database::transaction`].
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("entity database lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in an immediate transaction: committed on `Ok`, rolled back
    /// when `f` fails.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "rolling back entity transaction");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CredentialShare, TagMapping};
    use chrono::Utc;
    use serde_json::json;

    fn credential(shares: &[(&str, &str)]) -> CredentialRow {
        CredentialRow {
            id: "C1".into(),
            name: "Stripe".into(),
            credential_type: "api_key".into(),
            data: json!({}),
            shared_with: shares
                .iter()
                .map(|(principal, role)| CredentialShare {
                    principal: principal.to_string(),
                    role: role.to_string(),
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_creates_parent_and_reports_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("state/entities.db"),
        };
        let db = Database::open(&config).unwrap();
        let version = db.initialize().unwrap();
        assert!(version >= 1);
        assert_eq!(db.initialize().unwrap(), version);
        assert_eq!(db.path(), Some(config.path.as_path()));
        assert!(config.path.exists());
    }

    #[test]
    fn test_in_memory_has_no_path() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        assert!(db.path().is_none());
    }

    #[test]
    fn test_failed_transaction_keeps_previous_shares() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.upsert_credential(&credential(&[("project-1", "owner")])).unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute("DELETE FROM credential_shares WHERE credential_id = 'C1'", [])?;
            Err(DatabaseError::Corrupt {
                entity: "credential".into(),
                id: "C1".into(),
                detail: "abort".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(db.get_credential("C1").unwrap().unwrap().shared_with.len(), 1);
    }

    #[test]
    fn test_deleting_workflow_cascades_to_mappings() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.save_workflow("W1", "Invoices", json!({})).unwrap();
        db.upsert_tag(&TagRow {
            id: "T1".into(),
            name: "prod".into(),
            updated_at: Utc::now(),
        })
        .unwrap();
        db.add_tag_mapping(&TagMapping::new("T1", "W1")).unwrap();

        db.delete_workflow("W1").unwrap();
        assert!(db.list_tag_mappings().unwrap().is_empty());
    }
}
