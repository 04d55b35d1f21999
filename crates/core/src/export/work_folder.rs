//! JSON export and import between [`Database`] and the work folder.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    export_files, EntityExporter, EntityImporter, ExportSummary, ExportedCredential,
    ExportedTag, ExportedTags, ExportedVariable, ExportedWorkflow, ImportOptions, ImportResult,
};
use crate::db::{CredentialRow, Database, TagRow, VariableRow, WorkflowRow};
use crate::errors::{ExportError, ImportError};
use crate::models::{
    EntityKind, CREDENTIAL_EXPORT_FOLDER, TAGS_EXPORT_FILE, VARIABLES_EXPORT_FILE,
    WORKFLOW_EXPORT_FOLDER,
};

/// Exporter and importer over the entity database and a work folder.
pub struct WorkFolderExporter {
    db: Arc<Database>,
    work_folder: PathBuf,
}

impl WorkFolderExporter {
    pub fn new(db: Arc<Database>, work_folder: impl Into<PathBuf>) -> Self {
        Self {
            db,
            work_folder: work_folder.into(),
        }
    }

    fn write_json<T: Serialize>(
        &self,
        kind: EntityKind,
        id: &str,
        value: &T,
    ) -> Result<String, ExportError> {
        let rel = kind.export_path(id);
        let path = self.work_folder.join(&rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_vec_pretty(value).map_err(|e| ExportError::Serialize {
            entity: kind.to_string(),
            id: id.to_string(),
            detail: e.to_string(),
        })?;
        body.push(b'\n');
        std::fs::write(&path, body)?;
        debug!(file = %rel, "wrote export file");
        Ok(rel)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ImportError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| ImportError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl EntityExporter for WorkFolderExporter {
    fn work_folder(&self) -> &Path {
        &self.work_folder
    }

    fn clean_work_folder(&self) -> Result<(), ExportError> {
        for entry in [
            WORKFLOW_EXPORT_FOLDER,
            CREDENTIAL_EXPORT_FOLDER,
            VARIABLES_EXPORT_FILE,
            TAGS_EXPORT_FILE,
        ] {
            remove_if_exists(&self.work_folder.join(entry))?;
        }
        debug!(path = %self.work_folder.display(), "cleaned export tree");
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    fn export_workflows(&self, ids: &[String]) -> Result<ExportSummary, ExportError> {
        let mut summary = ExportSummary::new(EntityKind::Workflow);
        for id in ids {
            match self.db.get_workflow(id)? {
                Some(w) => {
                    let exported = ExportedWorkflow {
                        id: w.id,
                        name: w.name,
                        version_id: Some(w.version_id),
                        active: w.active,
                        definition: w.definition,
                        updated_at: Some(w.updated_at),
                    };
                    summary
                        .exported
                        .push(self.write_json(EntityKind::Workflow, id, &exported)?);
                }
                None => {
                    warn!(id = %id, "workflow not found for export");
                    summary.missing.push(id.clone());
                }
            }
        }
        info!(exported = summary.exported.len(), missing = summary.missing.len(), "exported workflows");
        Ok(summary)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    fn export_credentials(&self, ids: &[String]) -> Result<ExportSummary, ExportError> {
        let mut summary = ExportSummary::new(EntityKind::Credential);
        for id in ids {
            match self.db.get_credential(id)? {
                Some(c) => {
                    let mut shared_with = c.shared_with;
                    shared_with.sort();
                    let exported = ExportedCredential {
                        id: c.id,
                        name: c.name,
                        credential_type: c.credential_type,
                        shared_with,
                        updated_at: Some(c.updated_at),
                    };
                    summary
                        .exported
                        .push(self.write_json(EntityKind::Credential, id, &exported)?);
                }
                None => {
                    warn!(id = %id, "credential not found for export");
                    summary.missing.push(id.clone());
                }
            }
        }
        info!(exported = summary.exported.len(), missing = summary.missing.len(), "exported credentials");
        Ok(summary)
    }

    fn export_variables(&self) -> Result<ExportSummary, ExportError> {
        let variables: Vec<ExportedVariable> = self
            .db
            .list_variables()?
            .into_iter()
            .map(|v| ExportedVariable {
                id: v.id,
                key: v.key,
                variable_type: v.variable_type,
                value: v.value,
            })
            .collect();
        let mut summary = ExportSummary::new(EntityKind::Variables);
        summary
            .exported
            .push(self.write_json(EntityKind::Variables, "variables", &variables)?);
        info!(count = variables.len(), "exported variables");
        Ok(summary)
    }

    fn export_tags(&self) -> Result<ExportSummary, ExportError> {
        let tags = ExportedTags {
            tags: self
                .db
                .list_tags()?
                .into_iter()
                .map(|t| ExportedTag {
                    id: t.id,
                    name: t.name,
                    updated_at: Some(t.updated_at),
                })
                .collect(),
            mappings: self.db.list_tag_mappings()?,
        };
        let mut summary = ExportSummary::new(EntityKind::Tags);
        summary
            .exported
            .push(self.write_json(EntityKind::Tags, "tags", &tags)?);
        info!(tags = tags.tags.len(), mappings = tags.mappings.len(), "exported tags");
        Ok(summary)
    }
}

impl EntityImporter for WorkFolderExporter {
    #[instrument(skip(self))]
    fn import_from_work_folder(&self, options: &ImportOptions) -> Result<ImportResult, ImportError> {
        let root = self.work_folder.as_path();
        let mut result = ImportResult::default();

        let mut seen = BTreeSet::new();
        for path in export_files(root, EntityKind::Workflow)? {
            let Some(w) = self.workflow_from_file(&path)? else {
                continue;
            };
            let active = match self.db.get_workflow(&w.id)? {
                Some(existing) => existing.active,
                None => w.active,
            };
            self.db.upsert_workflow(&WorkflowRow {
                version_id: w.version_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                updated_at: w.updated_at.unwrap_or_else(Utc::now),
                id: w.id.clone(),
                name: w.name,
                definition: w.definition,
                active,
            })?;
            seen.insert(w.id);
            result.workflows += 1;
        }
        if options.delete_missing {
            for existing in self.db.list_workflows()? {
                if !seen.contains(&existing.id) && self.db.delete_workflow(&existing.id)? {
                    result.deleted += 1;
                }
            }
        }

        let mut seen = BTreeSet::new();
        for path in export_files(root, EntityKind::Credential)? {
            let Some(c) = self.credential_from_file(&path)? else {
                continue;
            };
            // Secrets never travel through the repository; keep what we have.
            let data = self
                .db
                .get_credential(&c.id)?
                .map(|existing| existing.data)
                .unwrap_or_else(|| serde_json::json!({}));
            self.db.upsert_credential(&CredentialRow {
                updated_at: c.updated_at.unwrap_or_else(Utc::now),
                id: c.id.clone(),
                name: c.name,
                credential_type: c.credential_type,
                data,
                shared_with: c.shared_with,
            })?;
            seen.insert(c.id);
            result.credentials += 1;
        }
        if options.delete_missing {
            for existing in self.db.list_credentials()? {
                if !seen.contains(&existing.id) && self.db.delete_credential(&existing.id)? {
                    result.deleted += 1;
                }
            }
        }

        if let Some(variables) = self.variables_from_file(&root.join(VARIABLES_EXPORT_FILE))? {
            let keep: BTreeSet<&str> = variables.iter().map(|v| v.id.as_str()).collect();
            for existing in self.db.list_variables()? {
                let stale = !keep.contains(existing.id.as_str());
                // A key now owned by another id replaces the old variable.
                let key_taken = variables
                    .iter()
                    .any(|v| v.key == existing.key && v.id != existing.id);
                if (stale && options.delete_missing) || key_taken {
                    self.db.delete_variable(&existing.id)?;
                    result.deleted += 1;
                }
            }
            for v in variables {
                self.db.upsert_variable(&VariableRow {
                    id: v.id,
                    key: v.key,
                    variable_type: v.variable_type,
                    value: v.value,
                })?;
                result.variables += 1;
            }
        }

        if let Some(tags) = self.tags_from_file(&root.join(TAGS_EXPORT_FILE))? {
            let keep: BTreeSet<&str> = tags.tags.iter().map(|t| t.id.as_str()).collect();
            if options.delete_missing {
                for existing in self.db.list_tags()? {
                    if !keep.contains(existing.id.as_str()) && self.db.delete_tag(&existing.id)? {
                        result.deleted += 1;
                    }
                }
            }
            for t in &tags.tags {
                self.db.upsert_tag(&TagRow {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    updated_at: t.updated_at.unwrap_or_else(Utc::now),
                })?;
                result.tags += 1;
            }
            result.mappings = self.db.replace_tag_mappings(&tags.mappings)?;
            if result.mappings < tags.mappings.len() {
                warn!(
                    skipped = tags.mappings.len() - result.mappings,
                    "skipped tag mappings referencing unknown tags or workflows"
                );
            }
        }

        info!(
            workflows = result.workflows,
            credentials = result.credentials,
            variables = result.variables,
            tags = result.tags,
            deleted = result.deleted,
            "import from work folder complete"
        );
        Ok(result)
    }

    fn workflow_from_file(&self, path: &Path) -> Result<Option<ExportedWorkflow>, ImportError> {
        read_json(path)
    }

    fn credential_from_file(
        &self,
        path: &Path,
    ) -> Result<Option<ExportedCredential>, ImportError> {
        read_json(path)
    }

    fn variables_from_file(
        &self,
        path: &Path,
    ) -> Result<Option<Vec<ExportedVariable>>, ImportError> {
        read_json(path)
    }

    fn tags_from_file(&self, path: &Path) -> Result<Option<ExportedTags>, ImportError> {
        read_json(path)
    }
}
