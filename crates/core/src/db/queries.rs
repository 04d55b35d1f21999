//! Typed query helpers for every table in the entity database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{self, CredentialShare, TagMapping};

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `workflows` table.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRow {
    pub id: String,
    pub name: String,
    pub version_id: String,
    /// Nodes, connections, and settings as stored JSON.
    pub definition: serde_json::Value,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `credentials` table together with its shares.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRow {
    pub id: String,
    pub name: String,
    pub credential_type: String,
    /// Secret payload; never exported.
    pub data: serde_json::Value,
    pub shared_with: Vec<CredentialShare>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `variables` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRow {
    pub id: String,
    pub key: String,
    pub variable_type: String,
    pub value: String,
}

/// A row from the `tags` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- workflows ----------------------------------------------------------

    /// Insert or replace a workflow exactly as given.
    pub fn upsert_workflow(&self, workflow: &WorkflowRow) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO workflows (id, name, version_id, definition, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                version_id = excluded.version_id,
                definition = excluded.definition,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                workflow.id,
                workflow.name,
                workflow.version_id,
                workflow.definition.to_string(),
                workflow.active,
                workflow.updated_at.to_rfc3339()
            ],
        )?;
        debug!(id = %workflow.id, version_id = %workflow.version_id, "upserted workflow");
        Ok(())
    }

    /// Save a workflow edit, assigning a fresh version id.
    pub fn save_workflow(
        &self,
        id: &str,
        name: &str,
        definition: serde_json::Value,
    ) -> Result<WorkflowRow, DatabaseError> {
        let active = self.get_workflow(id)?.map(|w| w.active).unwrap_or(false);
        let row = WorkflowRow {
            id: id.to_string(),
            name: name.to_string(),
            version_id: Uuid::new_v4().to_string(),
            definition,
            active,
            updated_at: Utc::now(),
        };
        self.upsert_workflow(&row)?;
        Ok(row)
    }

    /// Look up a workflow by id.
    pub fn get_workflow(&self, id: &str) -> Result<Option<WorkflowRow>, DatabaseError> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT id, name, version_id, definition, active, updated_at
                 FROM workflows WHERE id = ?1",
                params![id],
                raw_workflow,
            )
            .optional()?;
        raw.map(RawWorkflow::into_row).transpose()
    }

    /// List all workflows ordered by id.
    pub fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, version_id, definition, active, updated_at
             FROM workflows ORDER BY id",
        )?;
        let raws = stmt
            .query_map([], raw_workflow)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawWorkflow::into_row).collect()
    }

    /// Delete a workflow; its tag mappings cascade.
    pub fn delete_workflow(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM workflows WHERE id = ?1", params![id])?;
        debug!(id, deleted = changed > 0, "deleted workflow");
        Ok(changed > 0)
    }

    // -- credentials --------------------------------------------------------

    /// Insert or replace a credential and its full share list.
    pub fn upsert_credential(&self, credential: &CredentialRow) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO credentials (id, name, credential_type, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    credential_type = excluded.credential_type,
                    data = excluded.data,
                    updated_at = excluded.updated_at",
                params![
                    credential.id,
                    credential.name,
                    credential.credential_type,
                    credential.data.to_string(),
                    credential.updated_at.to_rfc3339()
                ],
            )?;
            conn.execute(
                "DELETE FROM credential_shares WHERE credential_id = ?1",
                params![credential.id],
            )?;
            for share in &credential.shared_with {
                conn.execute(
                    "INSERT OR REPLACE INTO credential_shares (credential_id, principal, role)
                     VALUES (?1, ?2, ?3)",
                    params![credential.id, share.principal, share.role],
                )?;
            }
            Ok(())
        })?;
        debug!(id = %credential.id, shares = credential.shared_with.len(), "upserted credential");
        Ok(())
    }

    /// Look up a credential by id.
    pub fn get_credential(&self, id: &str) -> Result<Option<CredentialRow>, DatabaseError> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT id, name, credential_type, data, updated_at
                 FROM credentials WHERE id = ?1",
                params![id],
                raw_credential,
            )
            .optional()?;
        match raw {
            Some(raw) => {
                let shares = shares_for(&conn, &raw.id)?;
                Ok(Some(raw.into_row(shares)?))
            }
            None => Ok(None),
        }
    }

    /// List all credentials ordered by id.
    pub fn list_credentials(&self) -> Result<Vec<CredentialRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, credential_type, data, updated_at
             FROM credentials ORDER BY id",
        )?;
        let raws = stmt
            .query_map([], raw_credential)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::with_capacity(raws.len());
        for raw in raws {
            let shares = shares_for(&conn, &raw.id)?;
            rows.push(raw.into_row(shares)?);
        }
        Ok(rows)
    }

    /// Delete a credential; its shares cascade.
    pub fn delete_credential(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM credentials WHERE id = ?1", params![id])?;
        debug!(id, deleted = changed > 0, "deleted credential");
        Ok(changed > 0)
    }

    // -- variables ----------------------------------------------------------

    /// Insert or replace a variable.
    pub fn upsert_variable(&self, variable: &VariableRow) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO variables (id, key, variable_type, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                key = excluded.key,
                variable_type = excluded.variable_type,
                value = excluded.value",
            params![variable.id, variable.key, variable.variable_type, variable.value],
        )?;
        debug!(id = %variable.id, key = %variable.key, "upserted variable");
        Ok(())
    }

    /// List all variables ordered by key.
    pub fn list_variables(&self) -> Result<Vec<VariableRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, key, variable_type, value FROM variables ORDER BY key, id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VariableRow {
                    id: row.get(0)?,
                    key: row.get(1)?,
                    variable_type: row.get(2)?,
                    value: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a variable.
    pub fn delete_variable(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM variables WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // -- tags ---------------------------------------------------------------

    /// Insert or replace a tag.
    pub fn upsert_tag(&self, tag: &TagRow) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tags (id, name, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
            params![tag.id, tag.name, tag.updated_at.to_rfc3339()],
        )?;
        debug!(id = %tag.id, name = %tag.name, "upserted tag");
        Ok(())
    }

    /// List all tags ordered by name.
    pub fn list_tags(&self) -> Result<Vec<TagRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, updated_at FROM tags ORDER BY name, id")?;
        let rows = stmt
            .query_map([], |row| {
                let updated_at: String = row.get(2)?;
                Ok(TagRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    updated_at: parse_datetime(&updated_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a tag; its mappings cascade.
    pub fn delete_tag(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM tags WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Attach a tag to a workflow. Attaching twice is a no-op.
    pub fn add_tag_mapping(&self, mapping: &TagMapping) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO workflow_tags (workflow_id, tag_id) VALUES (?1, ?2)",
            params![mapping.workflow_id, mapping.tag_id],
        )?;
        Ok(())
    }

    /// Detach a tag from a workflow.
    pub fn remove_tag_mapping(&self, mapping: &TagMapping) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM workflow_tags WHERE workflow_id = ?1 AND tag_id = ?2",
            params![mapping.workflow_id, mapping.tag_id],
        )?;
        Ok(changed > 0)
    }

    /// List every tag mapping ordered by `(tag_id, workflow_id)`.
    pub fn list_tag_mappings(&self) -> Result<Vec<TagMapping>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT tag_id, workflow_id FROM workflow_tags ORDER BY tag_id, workflow_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TagMapping {
                    tag_id: row.get(0)?,
                    workflow_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the whole mapping table. Mappings referencing a missing tag or
    /// workflow are skipped; the number written is returned.
    pub fn replace_tag_mappings(&self, mappings: &[TagMapping]) -> Result<usize, DatabaseError> {
        self.transaction(|conn| {
            conn.execute("DELETE FROM workflow_tags", [])?;
            let mut written = 0;
            for mapping in mappings {
                written += conn.execute(
                    "INSERT OR IGNORE INTO workflow_tags (workflow_id, tag_id)
                     SELECT w.id, t.id FROM workflows w, tags t
                     WHERE w.id = ?1 AND t.id = ?2",
                    params![mapping.workflow_id, mapping.tag_id],
                )?;
            }
            Ok(written)
        })
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry from a model struct.
    pub fn insert_audit_entry(&self, entry: &models::AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, details, success, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.action,
                entry.details,
                entry.success,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit_log entry");
        Ok(id)
    }

    /// List recent audit-log entries, newest first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    details: row.get(2)?,
                    success: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, "set kv_state");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct RawWorkflow {
    id: String,
    name: String,
    version_id: String,
    definition: String,
    active: bool,
    updated_at: String,
}

fn raw_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawWorkflow> {
    Ok(RawWorkflow {
        id: row.get(0)?,
        name: row.get(1)?,
        version_id: row.get(2)?,
        definition: row.get(3)?,
        active: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl RawWorkflow {
    fn into_row(self) -> Result<WorkflowRow, DatabaseError> {
        let definition = decode_json("workflow", &self.id, &self.definition)?;
        Ok(WorkflowRow {
            updated_at: parse_datetime(&self.updated_at),
            id: self.id,
            name: self.name,
            version_id: self.version_id,
            definition,
            active: self.active,
        })
    }
}

struct RawCredential {
    id: String,
    name: String,
    credential_type: String,
    data: String,
    updated_at: String,
}

fn raw_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCredential> {
    Ok(RawCredential {
        id: row.get(0)?,
        name: row.get(1)?,
        credential_type: row.get(2)?,
        data: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl RawCredential {
    fn into_row(self, shared_with: Vec<CredentialShare>) -> Result<CredentialRow, DatabaseError> {
        let data = decode_json("credential", &self.id, &self.data)?;
        Ok(CredentialRow {
            updated_at: parse_datetime(&self.updated_at),
            id: self.id,
            name: self.name,
            credential_type: self.credential_type,
            data,
            shared_with,
        })
    }
}

fn shares_for(conn: &Connection, credential_id: &str) -> Result<Vec<CredentialShare>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT principal, role FROM credential_shares
         WHERE credential_id = ?1 ORDER BY principal",
    )?;
    let shares = stmt
        .query_map(params![credential_id], |row| {
            Ok(CredentialShare {
                principal: row.get(0)?,
                role: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(shares)
}

fn decode_json(entity: &str, id: &str, raw: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Corrupt {
        entity: entity.to_string(),
        id: id.to_string(),
        detail: e.to_string(),
    })
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_save_workflow_assigns_new_version() {
        let db = setup_db();
        let first = db.save_workflow("W1", "Invoice intake", json!({"nodes": []})).unwrap();
        let second = db
            .save_workflow("W1", "Invoice intake", json!({"nodes": [{"type": "webhook"}]}))
            .unwrap();
        assert_ne!(first.version_id, second.version_id);

        let stored = db.get_workflow("W1").unwrap().unwrap();
        assert_eq!(stored.version_id, second.version_id);
        assert_eq!(stored.definition["nodes"][0]["type"], "webhook");
        assert_eq!(db.list_workflows().unwrap().len(), 1);
    }

    #[test]
    fn test_credential_shares_replaced_on_upsert() {
        let db = setup_db();
        let mut cred = CredentialRow {
            id: "C1".into(),
            name: "Slack bot".into(),
            credential_type: "slackApi".into(),
            data: json!({"token": "xoxb"}),
            shared_with: vec![
                CredentialShare { principal: "bob".into(), role: "user".into() },
                CredentialShare { principal: "alice".into(), role: "owner".into() },
            ],
            updated_at: Utc::now(),
        };
        db.upsert_credential(&cred).unwrap();
        let stored = db.get_credential("C1").unwrap().unwrap();
        assert_eq!(stored.shared_with[0].principal, "alice");
        assert_eq!(stored.data["token"], "xoxb");

        cred.shared_with.truncate(1);
        db.upsert_credential(&cred).unwrap();
        assert_eq!(db.get_credential("C1").unwrap().unwrap().shared_with.len(), 1);

        assert!(db.delete_credential("C1").unwrap());
        assert!(db.get_credential("C1").unwrap().is_none());
    }

    #[test]
    fn test_tag_mappings_cascade_and_replace() {
        let db = setup_db();
        db.save_workflow("W1", "a", json!({})).unwrap();
        db.save_workflow("W2", "b", json!({})).unwrap();
        db.upsert_tag(&TagRow { id: "T1".into(), name: "prod".into(), updated_at: Utc::now() })
            .unwrap();
        db.add_tag_mapping(&TagMapping::new("T1", "W1")).unwrap();
        db.add_tag_mapping(&TagMapping::new("T1", "W1")).unwrap();
        assert_eq!(db.list_tag_mappings().unwrap(), vec![TagMapping::new("T1", "W1")]);

        let written = db
            .replace_tag_mappings(&[TagMapping::new("T1", "W2"), TagMapping::new("T1", "missing")])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(db.list_tag_mappings().unwrap(), vec![TagMapping::new("T1", "W2")]);

        db.delete_workflow("W2").unwrap();
        assert!(db.list_tag_mappings().unwrap().is_empty());
    }

    #[test]
    fn test_variables_crud() {
        let db = setup_db();
        let var = VariableRow {
            id: "V1".into(),
            key: "API_URL".into(),
            variable_type: "string".into(),
            value: "https://example.com".into(),
        };
        db.upsert_variable(&var).unwrap();
        assert_eq!(db.list_variables().unwrap(), vec![var]);
        assert!(db.delete_variable("V1").unwrap());
        assert!(!db.delete_variable("V1").unwrap());
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_entry(&models::AuditEntry::failure("push", "rejected"))
            .unwrap();
        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].details.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_kv_state() {
        let db = setup_db();
        assert!(db.get_state("foo").unwrap().is_none());
        db.set_state("foo", "bar").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("bar"));
        db.set_state("foo", "baz").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("baz"));
    }
}
