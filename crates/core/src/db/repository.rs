//! Version projection of the local replica.
//!
//! The snapshot reader only needs identity, version, and comparison fields.
//! [`EntityRepository`] exposes exactly that, so tests can substitute an
//! in-memory implementation for the database.

use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    credential_fields, variable_fields, EntityKind, TagMapping, VersionedRecord,
};

/// Read-only access to the versioned records of the local replica.
pub trait EntityRepository: Send + Sync {
    /// All records of `kind`, ordered by id.
    fn versioned_records(&self, kind: EntityKind) -> Result<Vec<VersionedRecord>, DatabaseError>;

    /// Every tag-to-workflow mapping.
    fn tag_mappings(&self) -> Result<Vec<TagMapping>, DatabaseError>;
}

impl EntityRepository for Database {
    fn versioned_records(&self, kind: EntityKind) -> Result<Vec<VersionedRecord>, DatabaseError> {
        let mut records: Vec<VersionedRecord> = match kind {
            EntityKind::Workflow => self
                .list_workflows()?
                .into_iter()
                .map(|w| {
                    VersionedRecord::new(kind, w.id, w.name)
                        .with_version(w.version_id)
                        .with_updated_at(w.updated_at)
                })
                .collect(),
            EntityKind::Credential => self
                .list_credentials()?
                .into_iter()
                .map(|c| {
                    let mut record = VersionedRecord::new(kind, c.id, c.name)
                        .with_updated_at(c.updated_at);
                    record.fields = credential_fields(&c.credential_type, &c.shared_with);
                    record
                })
                .collect(),
            EntityKind::Variables => self
                .list_variables()?
                .into_iter()
                .map(|v| {
                    let mut record = VersionedRecord::new(kind, v.id, v.key);
                    record.fields = variable_fields(&v.variable_type, &v.value);
                    record
                })
                .collect(),
            EntityKind::Tags => self
                .list_tags()?
                .into_iter()
                .map(|t| VersionedRecord::new(kind, t.id, t.name).with_updated_at(t.updated_at))
                .collect(),
        };
        records.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(%kind, count = records.len(), "read local versioned records");
        Ok(records)
    }

    fn tag_mappings(&self) -> Result<Vec<TagMapping>, DatabaseError> {
        self.list_tag_mappings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CredentialRow, VariableRow};
    use crate::models::CredentialShare;
    use chrono::Utc;
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_workflow_records_carry_version() {
        let db = setup_db();
        let saved = db.save_workflow("W2", "second", json!({})).unwrap();
        db.save_workflow("W1", "first", json!({})).unwrap();

        let records = db.versioned_records(EntityKind::Workflow).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "W1");
        assert_eq!(records[1].version_id.as_deref(), Some(saved.version_id.as_str()));
        assert_eq!(records[1].file_path, "workflows/W2.json");
    }

    #[test]
    fn test_credential_records_exclude_secret_data() {
        let db = setup_db();
        db.upsert_credential(&CredentialRow {
            id: "C1".into(),
            name: "Slack".into(),
            credential_type: "slackApi".into(),
            data: json!({"token": "secret"}),
            shared_with: vec![CredentialShare { principal: "alice".into(), role: "owner".into() }],
            updated_at: Utc::now(),
        })
        .unwrap();

        let records = db.versioned_records(EntityKind::Credential).unwrap();
        assert_eq!(records[0].version_id, None);
        assert_eq!(records[0].fields["type"], "slackApi");
        assert!(!records[0].fields.values().any(|v| v.to_string().contains("secret")));
    }

    #[test]
    fn test_variable_records_named_by_key() {
        let db = setup_db();
        db.upsert_variable(&VariableRow {
            id: "V1".into(),
            key: "API_URL".into(),
            variable_type: "string".into(),
            value: "x".into(),
        })
        .unwrap();

        let records = db.versioned_records(EntityKind::Variables).unwrap();
        assert_eq!(records[0].name, "API_URL");
        assert_eq!(records[0].file_path, "variables.json");
        assert_eq!(records[0].fields["value"], "x");
    }
}
